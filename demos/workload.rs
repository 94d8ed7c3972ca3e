//! Concurrent workload demo: writer threads inserting disjoint key ranges
//! and hammering one shared key, while reader threads run ordered scans.

use std::{sync::Arc, thread};

use mvbst::prelude::*;

const WRITERS: usize = 4;
const KEYS_PER_WRITER: usize = 10;

fn main() {
    let tree = Arc::new(Tree::new());

    let mut handles = Vec::new();

    for w in 0..WRITERS {
        let tree = Arc::clone(&tree);
        handles.push(thread::spawn(move || {
            for i in 0..KEYS_PER_WRITER {
                let key = format!("w{w}-key{i:02}");
                tree.put(key.as_bytes(), format!("value{i}").as_bytes());
                tree.put(b"hot", format!("w{w}-append{i}").as_bytes());
            }
        }));
    }

    for _ in 0..2 {
        let tree = Arc::clone(&tree);
        handles.push(thread::spawn(move || {
            for _ in 0..100 {
                let _ = tree.range(b"w0", b"w3-key99");
            }
        }));
    }

    for handle in handles {
        handle.join().expect("worker panicked");
    }

    let all = tree.greater_than_eq(b"");
    println!(
        "{} keys total, hot key holds {} values",
        all.len(),
        tree.get(b"hot").map(|k| k.values().len()).unwrap_or(0)
    );

    tree.delete(b"hot");
    println!("after delete: {} keys", tree.nget(b"").len());

    tree.print();
}
