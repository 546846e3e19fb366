//! End-to-end fleet scenarios against the in-memory gateway.
//!
//! Covers:
//! - group rollout of a connection template
//! - manifest comparison across branches
//! - fleet dispatch with a failing repository followed by log extraction
//! - ordering and absence guarantees shared by every fan-out

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use fleetops_core::fakes::MemoryGateway;
use fleetops_core::{
    ConfigReplacer, FleetConfig, FleetRegistry, ManifestComparator, RunStatus, TemplateKey,
    WorkflowOrchestrator,
};

const APP: &str = "src/main/resources/application.yml";

fn fleet(templates: &Path) -> FleetRegistry {
    let raw = format!(
        r#"{{
            "organization": "acme",
            "branches": {{ "base": "develop", "compare": "main", "prefix": "feature/db-" }},
            "service_groups": {{
                "payments": {{ "folder": "folder1", "services": ["billing", "ledger", "invoices"] }},
                "identity": {{ "folder": "folder2", "services": ["auth", "profiles"] }}
            }},
            "config_files": {{ "application": "{APP}", "pom": "pom.xml" }},
            "workflow": {{ "workflow_file": "ci.yml" }},
            "templates_dir": "{}"
        }}"#,
        templates.display()
    );
    FleetRegistry::from_config(FleetConfig::from_json_str(&raw).unwrap()).unwrap()
}

fn pom(deps: &[(&str, &str, &str)]) -> String {
    let body: String = deps
        .iter()
        .map(|(g, a, v)| {
            format!(
                "<dependency><groupId>{g}</groupId><artifactId>{a}</artifactId><version>{v}</version></dependency>"
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0"?>
<project xmlns="http://maven.apache.org/POM/4.0.0"><dependencies>{body}</dependencies></project>"#
    )
}

// ---- Configuration rollout ----

#[tokio::test]
async fn scenario_group_rollout_succeeds_everywhere() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("postgres.yml"), "spring.datasource.url: jdbc:postgresql://db\n")
        .unwrap();
    let registry = fleet(dir.path());
    let gw = Arc::new(MemoryGateway::new());
    for svc in registry.all_services() {
        gw.put_file(&svc.repository, "feature/db-pg", APP, "spring.datasource.url: jdbc:h2:mem\n");
    }

    let replacer = ConfigReplacer::from_registry(gw.clone(), registry.clone());
    let report = replacer
        .apply_to_group("payments", "feature/db-pg", TemplateKey::Postgres)
        .await;

    let repos: Vec<&str> = report.results.iter().map(|r| r.repository.as_str()).collect();
    assert_eq!(repos, vec!["acme/billing", "acme/ledger", "acme/invoices"]);
    assert!(report.all_succeeded());
    assert!(gw
        .file("acme/ledger", "feature/db-pg", APP)
        .unwrap()
        .contains("postgresql"));
    assert!(gw
        .file("acme/auth", "feature/db-pg", APP)
        .unwrap()
        .contains("h2"));
}

#[test]
fn scenario_unknown_group_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    assert!(fleet(dir.path()).services_in_group("payroll").is_empty());
}

// ---- Manifest comparison ----

#[tokio::test]
async fn scenario_added_dependency_is_a_difference() {
    let dir = tempfile::tempdir().unwrap();
    let gw = Arc::new(MemoryGateway::new());
    gw.put_file("acme/billing", "develop", "pom.xml", &pom(&[("com.x", "lib", "1.0")]));
    gw.put_file(
        "acme/billing",
        "main",
        "pom.xml",
        &pom(&[("com.x", "lib", "1.0"), ("com.x", "lib2", "2.0")]),
    );

    let comparator = ManifestComparator::new(gw, fleet(dir.path()));
    let comparison = comparator
        .compare("acme/billing", "develop", "main")
        .await
        .unwrap();
    assert!(comparison.has_differences);
    assert_eq!(comparison.branch1_deps_count, 1);
    assert_eq!(comparison.branch2_deps_count, 2);
    assert_eq!(comparison.diff.dependencies_added.len(), 1);
    assert_eq!(comparison.diff.dependencies_added[0].artifact_id, "lib2");

    let same = comparator
        .compare("acme/billing", "main", "main")
        .await
        .unwrap();
    assert!(!same.has_differences);
}

#[tokio::test]
async fn scenario_dependency_order_is_irrelevant() {
    let dir = tempfile::tempdir().unwrap();
    let gw = Arc::new(MemoryGateway::new());
    let deps = [("a", "one", "1"), ("b", "two", "2"), ("c", "three", "3")];
    let mut shuffled = deps;
    shuffled.rotate_left(1);
    gw.put_file("acme/auth", "develop", "pom.xml", &pom(&deps));
    gw.put_file("acme/auth", "main", "pom.xml", &pom(&shuffled));

    let comparator = ManifestComparator::new(gw, fleet(dir.path()));
    let comparison = comparator.compare("acme/auth", "develop", "main").await.unwrap();
    assert!(!comparison.has_differences);
}

// ---- Workflow runs ----

#[tokio::test(start_paused = true)]
async fn scenario_dispatch_with_one_failure_then_extract_logs() {
    let dir = tempfile::tempdir().unwrap();
    let gw = Arc::new(MemoryGateway::new());
    gw.leave_unindexed("acme/invoices");

    let orchestrator =
        WorkflowOrchestrator::new(gw, fleet(dir.path())).with_logs_dir(dir.path().join("logs"));
    let session = orchestrator.dispatch_fleet("feature/db-pg").await;

    assert_eq!(session.results.len(), 5);
    let failed: Vec<_> = session.results.iter().filter(|r| !r.success).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].repository, "acme/invoices");
    assert!(failed[0].payload.is_none());

    let logs = orchestrator.extract_fleet_logs(&session).await;
    assert_eq!(logs.len(), 4);
    assert!(logs.iter().all(|l| l.path.starts_with(dir.path().join("logs"))));
    assert!(logs.iter().all(|l| l.service != "invoices"));
}

#[tokio::test(start_paused = true)]
async fn scenario_await_returns_terminal_run_or_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let gw = Arc::new(MemoryGateway::new());
    gw.set_run_script(vec![RunStatus::InProgress, RunStatus::Completed]);
    let orchestrator = WorkflowOrchestrator::new(gw.clone(), fleet(dir.path()));

    let run = orchestrator.dispatch("acme/auth", "develop").await.unwrap();
    let done = orchestrator
        .await_completion("acme/auth", run.run_id, Duration::from_secs(600))
        .await
        .unwrap();
    assert!(done.status.is_terminal());

    gw.set_run_script(vec![RunStatus::Waiting]);
    let stuck = orchestrator.dispatch("acme/profiles", "develop").await.unwrap();
    assert!(orchestrator
        .await_completion("acme/profiles", stuck.run_id, Duration::from_secs(45))
        .await
        .is_none());
}
