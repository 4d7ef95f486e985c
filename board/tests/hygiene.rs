//! Hygiene: enforces coding standards at test time
//!
//! Scans the board crate's production sources for patterns the sync core must
//! not contain. Every pattern has a budget (zero for all of them). A session
//! runs inside the host's event loop, so a panic takes the whole board down
//! and a swallowed error hides divergence between peers. The budget never
//! grows: fix an existing hit before adding a new one.

use std::fs;
use std::path::Path;

struct Budget {
    pattern: &'static str,
    max: usize,
    why: &'static str,
}

// Panics crash the host's event loop.
const PANICS: &[Budget] = &[
    Budget { pattern: ".unwrap()", max: 0, why: "propagate or handle the error" },
    Budget { pattern: ".expect(", max: 0, why: "propagate or handle the error" },
    Budget { pattern: "panic!(", max: 0, why: "return an error or skip with a log line" },
    Budget { pattern: "unreachable!(", max: 0, why: "make the state unrepresentable instead" },
    Budget { pattern: "todo!(", max: 0, why: "no stubs in the sync core" },
    Budget { pattern: "unimplemented!(", max: 0, why: "no stubs in the sync core" },
];

// Silent loss discards errors without inspecting them.
const SILENT_LOSS: &[Budget] = &[
    Budget { pattern: "let _ =", max: 0, why: "match the result and log the failure" },
    Budget { pattern: ".ok()", max: 0, why: "match the result and log the failure" },
];

// Style and structure.
const STYLE: &[Budget] = &[
    Budget { pattern: "#[allow(dead_code)]", max: 0, why: "delete unused code" },
    Budget { pattern: "println!(", max: 0, why: "library code logs through tracing" },
    Budget { pattern: "eprintln!(", max: 0, why: "library code logs through tracing" },
];

struct SourceFile {
    path: String,
    content: String,
}

/// Collect production `.rs` files from `board/src/`, excluding test files.
fn source_files() -> Vec<SourceFile> {
    let mut files = Vec::new();
    collect_rs_files(Path::new("src"), &mut files);
    files
}

fn collect_rs_files(dir: &Path, out: &mut Vec<SourceFile>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_rs_files(&path, out);
        } else if path.extension().is_some_and(|e| e == "rs") {
            let path_str = path.to_string_lossy().to_string();
            if path_str.ends_with("_test.rs") {
                continue;
            }
            if let Ok(content) = fs::read_to_string(&path) {
                out.push(SourceFile { path: path_str, content });
            }
        }
    }
}

fn hits_for(files: &[SourceFile], pattern: &str) -> Vec<(String, usize)> {
    files
        .iter()
        .filter_map(|file| {
            let count = file
                .content
                .lines()
                .filter(|line| line.contains(pattern))
                .count();
            (count > 0).then(|| (file.path.clone(), count))
        })
        .collect()
}

fn check(budgets: &[Budget]) {
    let files = source_files();
    assert!(!files.is_empty(), "no sources found; run from the board crate root");
    let mut failures = Vec::new();
    for budget in budgets {
        let hits = hits_for(&files, budget.pattern);
        let count: usize = hits.iter().map(|(_, c)| c).sum();
        if count > budget.max {
            let listing = hits
                .iter()
                .map(|(path, count)| format!("    {path}: {count}"))
                .collect::<Vec<_>>()
                .join("\n");
            failures.push(format!(
                "  `{}` budget exceeded: found {count}, max {} ({})\n{listing}",
                budget.pattern, budget.max, budget.why
            ));
        }
    }
    assert!(failures.is_empty(), "hygiene violations:\n{}", failures.join("\n"));
}

#[test]
fn panic_budget() {
    check(PANICS);
}

#[test]
fn silent_loss_budget() {
    check(SILENT_LOSS);
}

#[test]
fn style_budget() {
    check(STYLE);
}
