use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};

use sieve_compiler::Rejection;
use sieve_core::ids::Tier;
use sieve_core::types::{RuleAction, WHITELIST_PRIORITY};
use sieve_sync::{
    Adapters, Blocker, FilterListConfig, ManualClock, MemoryKeyValueStore, MemoryRuleEngine,
    RetryPolicy, StaticFetcher, SyncConfig, SyncError,
};

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

struct Fixture {
    engine: Arc<MemoryRuleEngine>,
    storage: Arc<MemoryKeyValueStore>,
    fetcher: Arc<StaticFetcher>,
    clock: Arc<ManualClock>,
}

impl Fixture {
    fn new() -> Self {
        Self::with_storage(MemoryKeyValueStore::new())
    }

    fn with_storage(storage: MemoryKeyValueStore) -> Self {
        let fetcher = StaticFetcher::new()
            .with_text(
                "mem://easylist",
                "! Title: EasyList\n||ads.example.com^\n/banner/*$image\nexample.com##.ad\n",
            )
            .with_text("mem://easyprivacy", "||tracker.example.net^$third-party\n");
        Self {
            engine: Arc::new(MemoryRuleEngine::new()),
            storage: Arc::new(storage),
            fetcher: Arc::new(fetcher),
            clock: Arc::new(ManualClock::new(DAY_MS * 100)),
        }
    }

    fn adapters(&self) -> Adapters {
        Adapters::new(self.engine.clone(), self.storage.clone(), self.fetcher.clone())
            .with_clock(self.clock.clone())
    }

    fn config() -> SyncConfig {
        let list = |id: &str, base: u32| FilterListConfig {
            id: id.into(),
            name: id.into(),
            url: Some(format!("mem://{id}")),
            enabled: true,
            id_base: base,
            capacity: 50_000 - base % 50_000,
        };
        SyncConfig {
            lists: vec![list("easylist", 1), list("easyprivacy", 50_000)],
            retry: RetryPolicy {
                max_attempts: 2,
                base_delay_ms: 1,
                max_delay_ms: 1,
            },
            ..SyncConfig::default()
        }
    }

    async fn blocker(&self) -> Blocker {
        let mut blocker = Blocker::new(Self::config(), self.adapters()).unwrap();
        blocker.initialize().await.unwrap();
        blocker
    }
}

#[tokio::test]
async fn initialize_compiles_due_lists() {
    let fx = Fixture::new();
    let blocker = fx.blocker().await;

    assert_eq!(blocker.compiled_rule_count(&Tier::static_list("easylist")), 2);
    assert_eq!(blocker.compiled_rule_count(&Tier::static_list("easyprivacy")), 1);

    let privacy = fx.engine.rules(&Tier::static_list("easyprivacy"));
    assert_eq!(privacy[0].id, 50_000);
    assert!(blocker
        .filter_lists()
        .iter()
        .all(|list| list.last_update == Some(DAY_MS * 100)));
    assert_eq!(fx.storage.value("lastFilterUpdate"), Some(json!(DAY_MS * 100)));
}

#[tokio::test]
async fn whitelist_rules_use_session_ids() {
    let fx = Fixture::new();
    let mut blocker = fx.blocker().await;

    blocker
        .recompute_whitelist(&["Example.com", "example.org", "example.com"])
        .await
        .unwrap();

    let rules = fx.engine.rules(&Tier::Session);
    let ids: Vec<_> = rules.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![900_000, 900_001]);
    assert!(rules.iter().all(|r| r.action == RuleAction::Allow));
    assert!(rules.iter().all(|r| r.priority == WHITELIST_PRIORITY));
    assert_eq!(
        rules[0].condition.request_domains,
        Some(vec!["example.com".to_string()])
    );

    assert!(blocker.is_whitelisted("shop.example.com"));
    assert!(!blocker.is_whitelisted("example.net"));
    assert_eq!(
        fx.storage.value("whitelistedDomains"),
        Some(json!(["example.com", "example.org"]))
    );
}

#[tokio::test]
async fn toggling_whitelist_recomputes_session_tier() {
    let fx = Fixture::new();
    let mut blocker = fx.blocker().await;

    assert!(blocker.toggle_whitelist("a.com").await.unwrap());
    assert!(blocker.toggle_whitelist("b.com").await.unwrap());
    assert!(!blocker.toggle_whitelist("a.com").await.unwrap());

    let rules = fx.engine.rules(&Tier::Session);
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].id, 900_000);
    assert_eq!(
        rules[0].condition.request_domains,
        Some(vec!["b.com".to_string()])
    );
}

#[tokio::test]
async fn one_failing_list_does_not_block_others() {
    let fx = Fixture::new();
    let mut blocker = fx.blocker().await;

    fx.clock.advance(Duration::from_millis(DAY_MS + 1));
    fx.fetcher.set_status("mem://easyprivacy", 502);
    fx.fetcher.set_text("mem://easylist", "||ads.example.com^\n||more.example.com^\n");

    let report = blocker.refresh_due_lists().await.unwrap();
    assert_eq!(report.succeeded, vec!["easylist"]);
    assert_eq!(report.failed.len(), 1);
    assert!(report.failed[0].1.contains("502"));

    let lists = blocker.filter_lists();
    assert_eq!(lists[0].last_update, Some(DAY_MS * 101 + 1));
    assert_eq!(lists[1].last_update, Some(DAY_MS * 100));
    assert_eq!(fx.engine.rules(&Tier::static_list("easylist")).len(), 2);
    assert_eq!(fx.engine.rules(&Tier::static_list("easyprivacy")).len(), 1);
}

#[tokio::test]
async fn custom_filters_compile_into_dynamic_tier() {
    let fx = Fixture::new();
    let mut blocker = fx.blocker().await;

    let first = blocker.add_custom_filter("||ads.example.org^").await.unwrap();
    let second = blocker
        .add_custom_filter("@@||ads.example.org^$image")
        .await
        .unwrap();
    assert_ne!(first, second);
    assert!((100_000..900_000).contains(&first));

    let err = blocker.add_custom_filter("example.com##.banner").await.unwrap_err();
    assert!(matches!(err, SyncError::Rejected(Rejection::UnsupportedCosmetic)));
    let err = blocker.add_custom_filter("! note").await.unwrap_err();
    assert!(matches!(err, SyncError::Rejected(Rejection::Skip)));

    let rules = fx.engine.rules(&Tier::Dynamic);
    assert_eq!(rules.len(), 2);
    assert_eq!(rules[1].action, RuleAction::Allow);
    assert_eq!(rules[1].priority, 2);

    let removed = blocker.remove_custom_filter(first).await.unwrap();
    assert_eq!(removed.filter, "||ads.example.org^");
    assert_eq!(fx.engine.rules(&Tier::Dynamic).len(), 1);
    assert!(matches!(
        blocker.remove_custom_filter(first).await,
        Err(SyncError::UnknownFilter(_))
    ));
}

#[tokio::test]
async fn custom_filters_replay_after_restart() {
    let fx = Fixture::new();
    let mut blocker = fx.blocker().await;
    let a = blocker.add_custom_filter("||a.example^").await.unwrap();
    let b = blocker.add_custom_filter("/pixel.gif").await.unwrap();
    blocker.toggle_whitelist("c.example").await.unwrap();

    let restarted = Fixture::with_storage(MemoryKeyValueStore::with_items(fx.storage.snapshot()));
    let mut blocker = restarted.blocker().await;
    assert_eq!(blocker.compiled_rule_count(&Tier::static_list("easylist")), 2);

    let ids: Vec<_> = blocker.custom_filters().iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![a, b]);
    let engine_ids: Vec<_> = restarted
        .engine
        .rules(&Tier::Dynamic)
        .iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(engine_ids, vec![a, b]);
    assert_eq!(blocker.whitelist(), ["c.example".to_string()]);

    let c = blocker.add_custom_filter("||d.example^").await.unwrap();
    assert!(c != a && c != b);

    let report = blocker.refresh_due_lists().await.unwrap();
    assert!(report.succeeded.is_empty());
}

#[tokio::test]
async fn restart_reloads_static_tiers_the_engine_still_holds() {
    let fx = Fixture::new();
    fx.blocker().await;

    let mut blocker = Blocker::new(Fixture::config(), fx.adapters()).unwrap();
    let report = blocker.initialize().await.unwrap();
    assert_eq!(report.succeeded, vec!["easylist", "easyprivacy"]);
    for id in ["easylist", "easyprivacy"] {
        let tier = Tier::static_list(id);
        assert_eq!(blocker.compiled_rule_count(&tier), fx.engine.rules(&tier).len());
    }
    assert_eq!(blocker.compiled_rule_count(&Tier::static_list("easylist")), 2);
}

#[tokio::test]
async fn failed_save_leaves_custom_filters_unchanged() {
    let fx = Fixture::new();
    let mut blocker = fx.blocker().await;

    fx.storage.fail_writes(1);
    let err = blocker.add_custom_filter("||x.example^").await.unwrap_err();
    assert!(matches!(err, SyncError::Storage(_)));
    assert!(blocker.custom_filters().is_empty());
    assert_eq!(blocker.compiled_rule_count(&Tier::Dynamic), 0);

    let id = blocker.add_custom_filter("||y.example^").await.unwrap();
    let engine_ids: Vec<_> = fx.engine.rules(&Tier::Dynamic).iter().map(|r| r.id).collect();
    assert_eq!(engine_ids, vec![id]);
    assert_eq!(
        fx.storage.value("customFilters"),
        Some(json!([{"id": id, "filter": "||y.example^"}]))
    );

    fx.storage.fail_writes(1);
    assert!(blocker.remove_custom_filter(id).await.is_err());
    assert_eq!(blocker.custom_filters().len(), 1);
    assert_eq!(blocker.compiled_rule_count(&Tier::Dynamic), 1);
    assert_eq!(fx.engine.rules(&Tier::Dynamic).len(), 1);
}

#[tokio::test]
async fn failed_save_keeps_previous_whitelist() {
    let fx = Fixture::new();
    let mut blocker = fx.blocker().await;
    blocker.toggle_whitelist("a.com").await.unwrap();

    fx.storage.fail_writes(1);
    assert!(blocker.toggle_whitelist("b.com").await.is_err());
    assert_eq!(blocker.whitelist(), ["a.com".to_string()]);
    assert_eq!(blocker.compiled_rule_count(&Tier::Session), 1);
    assert_eq!(fx.engine.rules(&Tier::Session).len(), 1);
    assert_eq!(fx.storage.value("whitelistedDomains"), Some(json!(["a.com"])));
}

#[tokio::test]
async fn whitelist_rejects_non_domains() {
    let fx = Fixture::new();
    let mut blocker = fx.blocker().await;
    blocker.toggle_whitelist("a.com").await.unwrap();

    let err = blocker.toggle_whitelist("not a domain").await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidDomain(ref d) if d == "not a domain"));
    assert!(matches!(
        blocker.toggle_whitelist("   ").await,
        Err(SyncError::InvalidDomain(_))
    ));

    let err = blocker
        .recompute_whitelist(&["ok.example", "ads.com/path"])
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidDomain(ref d) if d == "ads.com/path"));
    assert_eq!(blocker.whitelist(), ["a.com".to_string()]);

    blocker.recompute_whitelist(&["ok.example", " "]).await.unwrap();
    assert_eq!(blocker.whitelist(), ["ok.example".to_string()]);
}

#[tokio::test]
async fn broken_stored_filters_are_dropped_on_replay() {
    let mut items = Map::new();
    items.insert(
        "customFilters".into(),
        json!([
            {"id": 100_000, "filter": "||ok.example^"},
            {"id": 100_001, "filter": "example.com##.ad"},
            {"id": 5, "filter": "||wrong-range.example^"}
        ]),
    );
    let fx = Fixture::with_storage(MemoryKeyValueStore::with_items(items));
    let blocker = fx.blocker().await;

    assert_eq!(blocker.custom_filters().len(), 1);
    assert_eq!(
        fx.storage.value("customFilters"),
        Some(json!([{"id": 100_000, "filter": "||ok.example^"}]))
    );
}

#[tokio::test]
async fn global_toggle_leaves_whitelist_alone() {
    let fx = Fixture::new();
    let mut blocker = fx.blocker().await;
    blocker.toggle_whitelist("a.com").await.unwrap();
    blocker.set_list_enabled("easyprivacy", false).await.unwrap();

    blocker.set_enabled(false).await.unwrap();
    assert!(!blocker.is_enabled());
    assert!(!fx.engine.is_enabled(&Tier::static_list("easylist")));
    assert!(!fx.engine.is_enabled(&Tier::Dynamic));
    assert!(fx.engine.is_enabled(&Tier::Session));
    assert_eq!(fx.storage.value("isEnabled"), Some(Value::Bool(false)));

    blocker.set_enabled(true).await.unwrap();
    assert!(fx.engine.is_enabled(&Tier::static_list("easylist")));
    assert!(!fx.engine.is_enabled(&Tier::static_list("easyprivacy")));
    assert!(fx.engine.is_enabled(&Tier::Dynamic));
}

#[tokio::test]
async fn list_toggle_does_not_recompile() {
    let fx = Fixture::new();
    let mut blocker = fx.blocker().await;
    let applied = fx.engine.apply_calls();

    blocker.set_list_enabled("easylist", false).await.unwrap();
    assert!(!fx.engine.is_enabled(&Tier::static_list("easylist")));
    assert_eq!(fx.engine.apply_calls(), applied);
    assert_eq!(fx.fetcher.fetch_count("mem://easylist"), 1);

    assert!(matches!(
        blocker.set_list_enabled("missing", true).await,
        Err(SyncError::UnknownList(_))
    ));
}
