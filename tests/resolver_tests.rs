//! Synchronous resolution tests over real source trees

use annopack::config::ResolverConfig;
use annopack::registry::Key;
use annopack::resolver::{Context, ContextCache, ContextState, ResolveError, SourceState};
use std::path::Path;
use std::sync::{Arc, Mutex};
mod common;
use common::*;

async fn context_for(tree: &SourceTree) -> (Arc<ScriptBody>, Context) {
    tree.build_and_write().await;
    let body = Arc::new(ScriptBody::default());
    let mut context = Context::new(tree.root(), body.clone());
    context.load_context().unwrap();
    (body, context)
}

#[tokio::test]
async fn test_require_runs_prerequisites_in_declared_order() {
    let tree = SourceTree::new();
    tree.write("k.js", &source("p", &["K"], &["p.R1", "p.R2"], &["export p.K"]));
    tree.write("r1.js", &source("p", &["R1"], &["p.Shared"], &["export p.R1"]));
    tree.write("r2.js", &source("p", &["R2"], &["p.Shared"], &["export p.R2"]));
    tree.write("shared.js", &source("p", &["Shared"], &[], &["export p.Shared"]));
    let (body, mut context) = context_for(&tree).await;

    let value = context.require("p.K").unwrap().into_export().unwrap();
    assert_eq!(text(&value), "p.K");
    assert_eq!(body.log.names(), vec!["shared.js", "r1.js", "r2.js", "k.js"]);
    assert_eq!(
        context.source_state(&tree.path("k.js")),
        Some(SourceState::Loaded)
    );
}

#[tokio::test]
async fn test_each_source_runs_at_most_once() {
    let tree = SourceTree::new();
    tree.write("a.js", &source("p", &["A", "B"], &[], &["export p.A", "export p.B"]));
    tree.write("user1.js", &source("p", &["U1"], &["p.A"], &["export p.U1"]));
    tree.write("user2.js", &source("p", &["U2"], &["p.B"], &["require p.A", "export p.U2"]));
    let (body, mut context) = context_for(&tree).await;

    context.load_exports(["p.U1", "p.U2", "p.A", "p.B"]).unwrap();
    context.require("p.A").unwrap();
    context.load_source(&tree.path("a.js")).unwrap();
    assert_eq!(body.log.count(&tree.path("a.js")), 1);
    assert_eq!(body.log.runs().len(), 3);
}

#[tokio::test]
async fn test_circular_requires_report_chain() {
    let tree = SourceTree::new();
    tree.write("a.js", &source("A", &["y"], &["B.x"], &["export A.y"]));
    tree.write("b.js", &source("B", &["x"], &["A.y"], &["export B.x"]));
    let (body, mut context) = context_for(&tree).await;

    let err = context.require("A.y").unwrap_err();
    assert_eq!(
        err,
        ResolveError::CircularDependency {
            key: "A.y".to_string(),
            chain: vec!["A.y".to_string(), "B.x".to_string(), "A.y".to_string()],
        }
    );
    assert!(err.to_string().contains("A.y -> B.x -> A.y"));
    assert!(body.log.runs().is_empty());
    assert!(context.require_stack().is_empty());
}

#[tokio::test]
async fn test_missing_export_leaves_require_stack_empty() {
    let tree = SourceTree::new();
    tree.write("a.js", &source("p", &["A"], &[], &["require p.Nope", "export p.A"]));
    let (_body, mut context) = context_for(&tree).await;

    let err = context.require_export(&Key::new("p.A")).unwrap_err();
    assert_eq!(
        err,
        ResolveError::UnknownExport {
            key: "p.Nope".to_string()
        }
    );
    assert!(context.require_stack().is_empty());
    assert!(context.processing_stack().is_empty());

    // The failure is cached with the source
    assert_eq!(context.require("p.A").unwrap_err(), err);
}

#[tokio::test]
async fn test_wildcard_require_collects_package() {
    let tree = SourceTree::new();
    tree.write("w/one.js", &source("ui", &["One"], &[], &["export ui.One"]));
    tree.write("w/two.js", &source("ui", &["Two"], &[], &["export ui.Two"]));
    tree.write("app.js", &source("app", &["App"], &["ui.*"], &["export app.App"]));
    let (body, mut context) = context_for(&tree).await;

    context.require("app.App").unwrap();
    assert_eq!(body.log.names(), vec!["one.js", "two.js", "app.js"]);

    let exports = context.require("ui.*").unwrap().into_package().unwrap();
    assert_eq!(exports.keys().cloned().collect::<Vec<_>>(), vec!["One", "Two"]);
    assert_eq!(text(&exports["Two"]), "ui.Two");
}

#[tokio::test]
async fn test_autoload_and_single_load() {
    let tree = SourceTree::new();
    tree.write(
        "boot.js",
        "//@Package('app')\n//@Export('app.Boot')\n//@Require('app.Config')\n//@Autoload\nexport app.Boot\n",
    );
    tree.write("config.js", &source("app", &["Config"], &[], &["export app.Config"]));
    tree.write("lazy.js", &source("app", &["Lazy"], &[], &["export app.Lazy"]));
    let (body, mut context) = context_for(&tree).await;

    assert_eq!(context.state(), ContextState::Ready);
    assert_eq!(body.log.names(), vec!["config.js", "boot.js"]);
    assert_eq!(context.load_context(), Err(ResolveError::AlreadyLoaded));
}

#[tokio::test]
async fn test_export_not_produced() {
    let tree = SourceTree::new();
    tree.write("a.js", &source("p", &["A", "Forgotten"], &[], &["export p.A"]));
    let (_body, mut context) = context_for(&tree).await;

    let err = context.require("p.Forgotten").unwrap_err();
    assert_eq!(
        err,
        ResolveError::ExportNotProduced {
            key: "p.Forgotten".to_string(),
            source_path: tree.path("a.js"),
        }
    );
}

#[tokio::test]
async fn test_manual_exports_satisfy_requires() {
    let tree = SourceTree::new();
    tree.write("a.js", &source("p", &["A"], &["host.Clock"], &["export p.A"]));
    tree.build_and_write().await;

    let mut context = Context::new(tree.root(), Arc::new(ScriptBody::default()));
    context
        .export("host.Clock", annopack::resolver::Export::new(42u64))
        .unwrap();
    context.load_context().unwrap();
    context.require("p.A").unwrap();
    let clock = context.require("host.Clock").unwrap().into_export().unwrap();
    assert_eq!(clock.downcast_ref::<u64>(), Some(&42));
}

#[tokio::test]
async fn test_context_cache_shares_context_per_module() {
    let tree = SourceTree::new();
    tree.write("mod/a.js", &source("p", &["A"], &[], &["export p.A"]));
    tree.write("mod/deep/b.js", &source("p", &["B"], &["p.A"], &["export p.B"]));
    let document = annopack::registry::RegistryBuilder::new(
        tree.path("mod"),
        annopack::config::BuilderConfig::default(),
    )
    .build()
    .await
    .unwrap();
    document
        .write_to_file(&tree.path("mod/annopack-registry.json"))
        .unwrap();

    let cache: ContextCache<Arc<Mutex<Context>>> = ContextCache::new(&ResolverConfig::default());
    let body = Arc::new(ScriptBody::default());
    let factory = |root: &Path| {
        let mut context = Context::new(root, body.clone());
        context.load_context().unwrap();
        Arc::new(Mutex::new(context))
    };

    let first = cache.get_or_create(&tree.path("mod/deep/b.js"), factory).unwrap();
    let second = cache.get_or_create(&tree.path("mod/a.js"), factory).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(cache.roots(), vec![tree.path("mod")]);

    first.lock().unwrap().require("p.B").unwrap();
    assert!(second.lock().unwrap().library().has_export("p", "A"));
}
