//! Reference plugin used by the host test suite.
//!
//! Speaks the stdio plugin protocol: one handshake line, then one JSON
//! response per request line. Every method answers with
//! `{"name": <method>, "args": <args>}`.

use std::io::{BufRead, Write};

use serde_json::{Value, json};

fn main() {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    writeln!(out, "{}", json!({ "wicker": 1, "name": "echo" })).expect("handshake");
    out.flush().expect("flush");

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Value>(&line) {
            Ok(request) => {
                let id = request.get("id").cloned().unwrap_or(Value::Null);
                let method = request
                    .get("method")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_lowercase();
                let args = request.get("args").cloned().unwrap_or(json!([]));
                json!({ "id": id, "result": { "name": method, "args": args } })
            }
            Err(err) => json!({ "id": null, "error": format!("bad request: {err}") }),
        };
        writeln!(out, "{response}").expect("write response");
        out.flush().expect("flush");
    }
}
