use super::*;
use instrumenter_core::test_util::MockLLM;

fn tree(files: &[(&str, &str)]) -> RepoTree {
    let mut tree = RepoTree::default();
    for (path, content) in files {
        tree.insert(path, Document::new(*content, *path)).unwrap();
    }
    tree
}

fn classifier(reply: &str) -> (RepoClassifier, instrumenter_core::test_util::PromptLog) {
    let llm = MockLLM::new().reply(reply);
    let prompts = llm.prompts();
    (
        RepoClassifier::new(llm.boxed(), PromptTemplates::builtin()),
        prompts,
    )
}

#[test]
fn classifies_cdk_repository() {
    let repo = tree(&[
        ("cdk.json", "{\"app\": \"python3 app.py\"}"),
        ("app/stack.py", "from aws_cdk import Stack"),
        ("README.md", "hello"),
    ]);
    let (classifier, prompts) = classifier(
        "```json\n{\"repo_type\": \"cdk\", \"confidence\": 0.9, \"evidence\": [\"Found cdk.json\"], \
         \"script_file\": \"app/stack.py\", \"runtime\": \"python\"}\n```",
    );
    let verdict = classifier.classify(&repo).unwrap();
    assert_eq!(verdict.kind, RepoKind::Cdk);
    assert_eq!(verdict.runtime, Some(Runtime::Python));
    assert_eq!(verdict.evidence, ["Found cdk.json"]);
    assert_eq!(verdict.kind.iac_tool().map(IacTool::label), Some("CDK stack"));

    let prompt = prompts.last().unwrap();
    assert!(prompt.contains("File: app/stack.py\nfrom aws_cdk import Stack\n---"));
    assert!(prompt.contains("File: README.md\n---"));
    assert_eq!(prompts.all().len(), 1);
}

#[test]
fn empty_runtime_is_not_detected() {
    let repo = tree(&[("stack.py", "from aws_cdk import Stack")]);
    let (classifier, _) = classifier(
        r#"{"repo_type": "cdk", "confidence": 0.7, "evidence": [], "script_file": "stack.py", "runtime": ""}"#,
    );
    let verdict = classifier.classify(&repo).unwrap();
    assert_eq!(verdict.runtime, None);
    assert_eq!(
        serde_json::to_value(&verdict).unwrap()["runtime"],
        serde_json::json!("")
    );
}

#[test]
fn terraform_dispatches_to_terraform_label() {
    let (classifier, _) = classifier(
        r#"{"repo_type": "terraform", "confidence": 1, "evidence": ["main.tf"], "script_file": "main.tf", "runtime": "node.js"}"#,
    );
    let verdict = classifier.classify(&tree(&[("main.tf", "")])).unwrap();
    assert_eq!(verdict.kind.iac_tool(), Some(IacTool::Terraform));
    assert_eq!(IacTool::Terraform.label(), "Terraform");
    assert_eq!(verdict.runtime.map(Runtime::url_path), Some("nodejs"));
    assert_eq!(RepoKind::Neither.iac_tool(), None);
}

#[test]
fn rejects_malformed_verdicts() {
    for reply in [
        r#"{"repo_type": "pulumi", "confidence": 0.5, "evidence": []}"#,
        r#"{"repo_type": "cdk", "confidence": 1.5, "evidence": []}"#,
        r#"{"repo_type": "cdk", "confidence": 0.5, "evidence": [], "runtime": "cobol"}"#,
        r#"{"repo_type": "cdk", "confidence": 0.5}"#,
        r#"{"repo_type": "cdk", "confidence": 0.5, "evidence": [], "cdk_script_file": "x"}"#,
    ] {
        let (classifier, _) = classifier(reply);
        let err = classifier.classify(&RepoTree::default()).unwrap_err();
        assert!(
            matches!(err, ClassifyError::Llm(LlmError::Validation { .. })),
            "{reply} gave {err:?}"
        );
        assert_eq!(err.raw_response(), Some(reply));
    }

    let (classifier, _) = classifier("I think it is CDK.");
    let err = classifier.classify(&RepoTree::default()).unwrap_err();
    assert!(matches!(err, ClassifyError::Llm(LlmError::Parse { .. })));
}

#[test]
fn listing_excerpts_are_bounded() {
    let long = format!("resource {}", "x".repeat(1000));
    let repo = tree(&[("main.tf", &long), ("notes.txt", "nothing relevant")]);
    let listing = render_listing(&repo, 20);
    assert!(listing.contains(&format!("File: main.tf\n{}\n---", &long[..20])));
    assert!(!listing.contains("nothing relevant"));
    assert!(!render_listing(&repo, 0).contains("resource"));
}

fn verdict(kind: RepoKind, script_file: &str, runtime: Option<Runtime>) -> RepoType {
    RepoType {
        kind,
        confidence: 0.9,
        evidence: vec![],
        script_file: script_file.into(),
        runtime,
    }
}

#[test]
fn locate_by_path_and_basename() {
    let repo = tree(&[
        ("infra/lib/app-stack.ts", "export class App extends cdk.Stack {}"),
        ("infra/bin/app.ts", "new App()"),
    ]);
    let found = locate_script(&repo, &verdict(RepoKind::Cdk, "infra/lib/app-stack.ts", None)).unwrap();
    assert_eq!(found.source(), "infra/lib/app-stack.ts");
    let found = locate_script(&repo, &verdict(RepoKind::Cdk, "./lib/app-stack.ts", None)).unwrap();
    assert_eq!(found.source(), "infra/lib/app-stack.ts");
}

#[test]
fn locate_falls_back_to_markers() {
    let repo = tree(&[
        ("app.py", "import aws_cdk as cdk"),
        ("stacks/lambda_stack.py", "from aws_cdk import Stack\nclass L(Stack): pass"),
        ("modules/fn/main.tf", "resource \"aws_lambda_function\" \"fn\" {}"),
        ("variables.tf", "variable \"env\" {}"),
    ]);
    let found = locate_script(&repo, &verdict(RepoKind::Cdk, "missing.py", Some(Runtime::Python))).unwrap();
    assert_eq!(found.source(), "stacks/lambda_stack.py");
    let found = locate_script(&repo, &verdict(RepoKind::Cdk, "", None)).unwrap();
    assert_eq!(found.source(), "stacks/lambda_stack.py");
    let found = locate_script(&repo, &verdict(RepoKind::Terraform, "", None)).unwrap();
    assert_eq!(found.source(), "modules/fn/main.tf");

    assert!(matches!(
        locate_script(&repo, &verdict(RepoKind::Cdk, "", Some(Runtime::Ruby))),
        Err(LocateError::NotFound { tool: IacTool::Cdk, .. })
    ));
    assert!(matches!(
        locate_script(&repo, &verdict(RepoKind::Neither, "app.py", None)),
        Err(LocateError::NotInfrastructure)
    ));
}

#[test]
fn config_defaults() {
    let config: Config = serde_json::from_value(serde_json::json!({
        "backend": "openai",
        "model": "gpt-4o-mini",
        "max_tokens": 2000,
        "mystery": 1,
    }))
    .unwrap();
    assert_eq!(config.excerpt_chars, 400);
    assert_eq!(config.glob, "**/*");
    assert!(!config.structured_output);
    assert!(config.unknown.contains_key("mystery"));
    assert_eq!(Config::mock().llm.model, "mock_model");
}
