use serde_json::json;
use tungstenite::Message;

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!(
            "usage: {} ws_url [symbol] [depth] [push_ms] [max_frames]",
            args[0]
        );
        eprintln!("example: {} ws://127.0.0.1:8080 CLX5 10 50 20", args[0]);
        std::process::exit(1);
    }
    let url = args[1].clone();
    let symbol = args.get(2).cloned().unwrap_or_default();
    let depth: i64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(10);
    let push_ms: i64 = args.get(4).and_then(|s| s.parse().ok()).unwrap_or(50);
    let max_frames: u64 = args.get(5).and_then(|s| s.parse().ok()).unwrap_or(0);

    let (mut ws, _) = tungstenite::connect(url.as_str()).expect("ws connect");

    let mut sub = json!({"type": "subscribe", "depth": depth, "push_ms": push_ms});
    if !symbol.is_empty() {
        sub["symbol"] = json!(symbol);
    }
    ws.send(Message::Text(sub.to_string())).expect("subscribe");

    let mut frames: u64 = 0;
    while let Ok(msg) = ws.read() {
        if let Message::Text(txt) = msg {
            println!("{txt}");
            frames += 1;
            if max_frames > 0 && frames >= max_frames {
                break;
            }
        }
    }
}
