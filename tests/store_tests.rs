use mreplace::{DocumentStore, EditRequest, MatchStrategy, ReplaceError, StoreError};
use std::fs;
use std::path::PathBuf;
use std::thread;
use tempfile::tempdir;

#[test]
fn test_replace_text_writes_document() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempdir().unwrap();
    let file_path = dir.path().join("greetings.txt");
    fs::write(&file_path, "Hello, World!\nHello, again!\nGoodbye!").unwrap();

    let store = DocumentStore::new(dir.path());
    let request = EditRequest::new("Hello, World!", "Hi there!");
    let outcome = store.replace_text("greetings.txt", &request, false).unwrap();

    assert!(outcome.diff.is_none());
    assert_eq!(outcome.replacement.strategy, MatchStrategy::Exact);
    assert_eq!(
        fs::read_to_string(&file_path).unwrap(),
        "Hi there!\nHello, again!\nGoodbye!"
    );
}

#[test]
fn test_replace_all_request() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("todo.md"), "- [ ] a\n- [ ] b\n").unwrap();

    let store = DocumentStore::new(dir.path());
    let request = EditRequest::new("- [ ]", "- [x]").replace_all(true);
    let outcome = store.replace_text("todo.md", &request, false).unwrap();

    assert_eq!(outcome.replacement.message(), "Replaced all 2 occurrences.");
    assert_eq!(
        store.fetch_content("todo.md").unwrap(),
        "- [x] a\n- [x] b\n"
    );
}

#[test]
fn test_dry_run_returns_diff_without_writing() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempdir().unwrap();
    let file_path = dir.path().join("dry.txt");
    fs::write(&file_path, "keep\nchange me\nkeep\n").unwrap();

    let store = DocumentStore::new(dir.path());
    let request = EditRequest::new("change me", "changed");
    let outcome = store.replace_text("dry.txt", &request, true).unwrap();

    let diff = outcome.diff.expect("dry run should produce a diff");
    assert!(diff.contains("--- a/dry.txt"));
    assert!(diff.contains("+++ b/dry.txt"));
    assert!(diff.contains("-change me"));
    assert!(diff.contains("+changed"));
    assert_eq!(outcome.replacement.new_content, "keep\nchanged\nkeep\n");
    assert_eq!(
        fs::read_to_string(&file_path).unwrap(),
        "keep\nchange me\nkeep\n"
    );
}

#[test]
fn test_rejected_edit_leaves_document_untouched() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempdir().unwrap();
    let file_path = dir.path().join("dup.txt");
    fs::write(&file_path, "same\nsame\n").unwrap();

    let store = DocumentStore::new(dir.path());
    let result = store.replace_text("dup.txt", &EditRequest::new("same", "other"), false);

    match result {
        Err(StoreError::Edit { path, source }) => {
            assert_eq!(path, PathBuf::from("dup.txt"));
            assert_eq!(source, ReplaceError::AmbiguousMatch);
        }
        other => panic!("expected an ambiguous edit error, got {:?}", other),
    }
    assert_eq!(fs::read_to_string(&file_path).unwrap(), "same\nsame\n");
}

#[test]
fn test_identical_strings_are_rejected() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.txt"), "text").unwrap();
    let store = DocumentStore::new(dir.path());

    let result = store.replace_text("a.txt", &EditRequest::new("text", "text"), false);
    assert!(matches!(
        result,
        Err(StoreError::Edit {
            source: ReplaceError::InvalidInput,
            ..
        })
    ));
}

#[test]
fn test_path_traversal_is_blocked() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempdir().unwrap();
    let root = dir.path().join("docs");
    fs::create_dir(&root).unwrap();
    fs::write(dir.path().join("secret.txt"), "secret").unwrap();

    let store = DocumentStore::new(&root);
    let result = store.replace_text("../secret.txt", &EditRequest::new("secret", "leaked"), false);

    assert!(matches!(result, Err(StoreError::PathTraversal(_))));
    assert_eq!(
        fs::read_to_string(dir.path().join("secret.txt")).unwrap(),
        "secret"
    );
}

#[test]
fn test_absolute_path_is_blocked() {
    let dir = tempdir().unwrap();
    let outside = dir.path().join("outside.txt");
    fs::write(&outside, "x").unwrap();
    let root = dir.path().join("root");
    fs::create_dir(&root).unwrap();

    let store = DocumentStore::new(&root);
    assert!(matches!(
        store.fetch_content(&outside),
        Err(StoreError::PathTraversal(_))
    ));
}

#[test]
fn test_missing_document() {
    let dir = tempdir().unwrap();
    let store = DocumentStore::new(dir.path());

    let result = store.replace_text("nope.txt", &EditRequest::new("a", "b"), false);
    assert!(matches!(result, Err(StoreError::DocumentNotFound(p)) if p == PathBuf::from("nope.txt")));
}

#[test]
fn test_directory_is_not_a_document() {
    let dir = tempdir().unwrap();
    fs::create_dir(dir.path().join("sub")).unwrap();
    let store = DocumentStore::new(dir.path());

    assert!(matches!(
        store.fetch_content("sub"),
        Err(StoreError::NotAFile { .. })
    ));
}

#[test]
fn test_list_documents_skips_hidden_entries() {
    let dir = tempdir().unwrap();
    fs::create_dir_all(dir.path().join("a")).unwrap();
    fs::create_dir_all(dir.path().join(".git")).unwrap();
    fs::write(dir.path().join("b.txt"), "").unwrap();
    fs::write(dir.path().join("a").join("c.txt"), "").unwrap();
    fs::write(dir.path().join(".env"), "").unwrap();
    fs::write(dir.path().join(".git").join("HEAD"), "").unwrap();

    let store = DocumentStore::new(dir.path());
    let documents = store.list_documents().unwrap();

    assert_eq!(
        documents,
        vec![PathBuf::from("a").join("c.txt"), PathBuf::from("b.txt")]
    );
}

#[test]
fn test_concurrent_edits_to_one_document_are_not_lost() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempdir().unwrap();
    let original: String = (0..8).map(|i| format!("slot {}: empty\n", i)).collect();
    fs::write(dir.path().join("slots.txt"), &original).unwrap();

    let store = DocumentStore::new(dir.path());
    thread::scope(|scope| {
        for i in 0..8 {
            let store = &store;
            scope.spawn(move || {
                let request = EditRequest::new(
                    format!("slot {}: empty", i),
                    format!("slot {}: filled", i),
                );
                store.replace_text("slots.txt", &request, false).unwrap();
            });
        }
    });

    let expected: String = (0..8).map(|i| format!("slot {}: filled\n", i)).collect();
    assert_eq!(store.fetch_content("slots.txt").unwrap(), expected);
    assert_eq!(store.active_edits(), 0);
}

#[test]
fn test_document_locks_are_released_after_edits() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.txt"), "one\n").unwrap();
    fs::write(dir.path().join("b.txt"), "two\ntwo\n").unwrap();
    let store = DocumentStore::new(dir.path());

    store
        .replace_text("a.txt", &EditRequest::new("one", "1"), false)
        .unwrap();
    store
        .replace_text("a.txt", &EditRequest::new("1", "one"), true)
        .unwrap();
    assert!(store
        .replace_text("b.txt", &EditRequest::new("two", "2"), false)
        .is_err());

    assert_eq!(store.active_edits(), 0);
}
