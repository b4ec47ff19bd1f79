use super::*;
use crate::test_util::tempdir;
use std::fs::{create_dir_all, write};

/// Builds a directory on disk with the given files.
fn repo(files: &[(&str, &[u8])]) -> tempfile::TempDir {
    let dir = tempdir().unwrap();
    for (path, contents) in files {
        let path = dir.path().join(path);
        create_dir_all(path.parent().unwrap()).unwrap();
        write(path, contents).unwrap();
    }
    dir
}

#[test]
fn reads_nested_text_files() {
    let dir = repo(&[
        ("README.md", b"# demo"),
        ("lib/stack.ts", b"export class S extends cdk.Stack {}"),
        ("lib/nested/deep.ts", b"deep"),
    ]);
    let tree = RepoTree::read(dir.path()).unwrap();
    assert_eq!(tree.len(), 3);

    let stack = tree.get_document("lib/stack.ts").unwrap();
    assert_eq!(stack.content(), "export class S extends cdk.Stack {}");
    assert_eq!(stack.source(), "lib/stack.ts");
    assert_eq!(stack.filename(), "stack.ts");
    assert!(tree.get("lib/nested").unwrap().dir().is_some());
    assert_eq!(
        tree.get_document("lib/nested/deep.ts").unwrap().source(),
        "lib/nested/deep.ts"
    );
}

#[test]
fn skips_binary_and_hidden_files() {
    let dir = repo(&[
        ("main.tf", b"resource \"aws_lambda_function\" \"f\" {}"),
        ("logo.png", &[0x89, 0x50, 0xff, 0xfe, 0x00]),
        (".git/config", b"[core]"),
        (".env", b"SECRET=1"),
    ]);
    let tree = RepoTree::read(dir.path()).unwrap();
    assert_eq!(tree.len(), 1);
    assert!(tree.get_document("main.tf").is_some());
    assert_eq!(tree.get("logo.png").err(), Some(GetError::NotFound));
    assert_eq!(tree.get(".git").err(), Some(GetError::NotFound));
}

#[test]
fn glob_restricts_files() {
    let dir = repo(&[
        ("infra/main.tf", b"terraform {}"),
        ("infra/vars.tf", b"variable \"x\" {}"),
        ("src/handler.py", b"def handler(): pass"),
    ]);
    let tree = RepoTree::read_matching(dir.path(), "*.tf").unwrap();
    assert_eq!(tree.len(), 2);
    assert!(tree.get_document("src/handler.py").is_none());

    assert!(matches!(
        RepoTree::read_matching(dir.path(), "[unclosed"),
        Err(TreeReadError::InvalidGlob { .. })
    ));
}

#[test]
fn empty_and_missing_roots() {
    let dir = tempdir().unwrap();
    create_dir_all(dir.path().join("empty/nested")).unwrap();
    let tree = RepoTree::read(dir.path()).unwrap();
    assert!(tree.is_empty());
    assert!(tree.documents().is_empty());

    assert!(matches!(
        RepoTree::read(dir.path().join("missing")),
        Err(TreeReadError::Root { .. })
    ));
}

#[test]
fn get_rejects_paths_outside_the_tree() {
    use GetError::*;
    let mut tree = RepoTree::default();
    tree.insert("lib/stack.ts", Document::new("", "lib/stack.ts"))
        .unwrap();
    assert_eq!(tree.get("/lib").err(), Some(LeavesTree));
    assert_eq!(tree.get("lib/../lib").err(), Some(LeavesTree));
    assert_eq!(tree.get("lib/stack.ts/x").err(), Some(NotADirectory));
    assert_eq!(tree.get("lib/other.ts").err(), Some(NotFound));
    assert_eq!(tree.get("").err(), Some(NotFound));
    assert!(tree.get("./lib/stack.ts").unwrap().file().is_some());
}

#[test]
fn insert_conflicts() {
    let mut tree = RepoTree::default();
    tree.insert("a/b", Document::new("", "a/b")).unwrap();
    assert!(matches!(
        tree.insert("a/b", Document::new("", "a/b")),
        Err(TreeReadError::Conflict(_))
    ));
    assert!(matches!(
        tree.insert("a/b/c", Document::new("", "a/b/c")),
        Err(TreeReadError::Conflict(_))
    ));
    assert!(matches!(
        tree.insert("a", Document::new("", "a")),
        Err(TreeReadError::Conflict(_))
    ));
}

#[test]
fn find_by_filename_searches_all_directories() {
    let mut tree = RepoTree::default();
    tree.insert("infra/lib/app-stack.ts", Document::new("x", "infra/lib/app-stack.ts"))
        .unwrap();
    let found = tree.find_by_filename("app-stack.ts").unwrap();
    assert_eq!(found.source(), "infra/lib/app-stack.ts");
    assert!(tree.find_by_filename("other.ts").is_none());
}

#[test]
fn document_metadata() {
    let doc = Document::new("body", "dir/file.py").with_metadata("size", 4);
    assert_eq!(doc.metadata()["size"], 4);
    assert_eq!(doc.filename(), "file.py");
    assert_eq!(Document::new("", "top.py").filename(), "top.py");
}
