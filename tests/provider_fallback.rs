use httptest::matchers::{all_of, contains, request, url_decoded};
use httptest::responders::{json_encoded, status_code};
use httptest::{Expectation, Server};
use secrecy::SecretString;
use serde_json::json;
use tempfile::tempdir;

use keyword_rankings::{
    AppConfig, AppState, CacheStatus, CampaignIdentity, FetchSource, ProviderSettings,
};

const TRACKING_PATH: &str = "/projects/1234567/tracking/";

fn config_for(server: &Server) -> AppConfig {
    let base = server.url_str("/");
    AppConfig {
        provider: ProviderSettings {
            api_key: Some(SecretString::new("integration-key".into())),
            primary_base_url: format!("{base}projects"),
            fallback_base_url: base,
            database: "us".into(),
            display_limit: 100,
            request_timeout_secs: 5,
        },
        overall_timeout_secs: 30,
        cache_ttl_days: 14,
        database_file_name: "rankings.db".into(),
        diagnostics_enabled: true,
        diagnostics_max_bytes: 1024 * 1024,
    }
}

fn identity() -> CampaignIdentity {
    CampaignIdentity::new("1234567_890", "https://www.example.com")
}

#[tokio::test]
async fn first_mask_with_data_is_the_only_request() {
    let server = Server::run();
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", TRACKING_PATH),
            request::query(url_decoded(contains(("url", "*.example.com/*")))),
            request::query(url_decoded(contains(("type", "tracking_position_organic")))),
            request::query(url_decoded(contains(("key", "integration-key")))),
        ])
        .times(1)
        .respond_with(json_encoded(json!({
            "data": {
                "0": {
                    "Ph": "rain barrel",
                    "Dt": { "20240101": { "example.com": 6 } },
                    "Pdt": { "20240101": 9 },
                    "Nq": "1900",
                    "Lu": { "20240101": { "example.com": "https://example.com/barrels" } },
                    "Tr": { "20240101": 0.042 }
                },
                "1": { "Ph": "unranked phrase", "Dt": { "20240101": "-" }, "Nq": "10" }
            }
        }))),
    );

    let dir = tempdir().unwrap();
    let state = AppState::with_config(dir.path(), config_for(&server)).unwrap();
    let service = state.service();
    service.configure_campaign("acme", "main", &identity()).unwrap();

    let view = service.rankings("acme", "main").await.unwrap();

    assert_eq!(view.status, CacheStatus::Refreshed);
    assert_eq!(view.source, FetchSource::Primary);
    assert_eq!(view.keywords.len(), 1);
    let record = &view.keywords[0];
    assert_eq!(record.keyword, "rain barrel");
    assert_eq!(record.position, 6);
    assert_eq!(record.previous_position, Some(9));
    assert_eq!(record.search_volume, 1900);
    assert_eq!(record.url, "https://example.com/barrels");
    assert!((record.traffic_percent - 4.2).abs() < 1e-9);

    let cached = service.rankings("acme", "main").await.unwrap();
    assert_eq!(cached.status, CacheStatus::Cached);
    assert_eq!(cached.keywords, view.keywords);
}

#[tokio::test]
async fn falls_through_to_extended_tier_and_joins_volumes() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", TRACKING_PATH))
            .times(3)
            .respond_with(json_encoded(json!({ "data": {} }))),
    );
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", "/"),
            request::query(url_decoded(contains(("type", "domain_organic")))),
            request::query(url_decoded(contains(("export_columns", "Ph,Po,Nq")))),
        ])
        .times(1)
        .respond_with(status_code(200).body("No data for this domain")),
    );
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", "/"),
            request::query(url_decoded(contains(("type", "domain_organic")))),
            request::query(url_decoded(contains(("export_columns", "Ph,Po")))),
            request::query(url_decoded(contains(("domain", "example.com")))),
        ])
        .times(1)
        .respond_with(
            status_code(200).body("Keyword|Position\nrain barrel|12\ngarden hose|4\nleaf rake|0\n"),
        ),
    );
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", "/"),
            request::query(url_decoded(contains(("type", "domain_organic_phrases")))),
        ])
        .times(1)
        .respond_with(status_code(200).body("Keyword|Search Volume\ngarden hose|5400\n")),
    );

    let dir = tempdir().unwrap();
    let state = AppState::with_config(dir.path(), config_for(&server)).unwrap();
    let service = state.service();
    service.configure_campaign("acme", "main", &identity()).unwrap();

    let view = service.rankings("acme", "main").await.unwrap();

    assert_eq!(view.source, FetchSource::FallbackExtended);
    let summary = view
        .keywords
        .iter()
        .map(|k| (k.keyword.as_str(), k.position, k.search_volume))
        .collect::<Vec<_>>();
    assert_eq!(summary, vec![("garden hose", 4, 5400), ("rain barrel", 12, 0)]);
    let tiers = view.attempts.iter().map(|a| a.source).collect::<Vec<_>>();
    assert_eq!(
        tiers,
        vec![
            FetchSource::Primary,
            FetchSource::FallbackSimple,
            FetchSource::FallbackExtended
        ]
    );

    let diagnostics = std::fs::read_to_string(dir.path().join("diagnostics.jsonl")).unwrap();
    assert_eq!(diagnostics.matches("fetch_attempt").count(), 3);
}

#[tokio::test]
async fn provider_outage_is_reported_without_leaking_the_key() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", TRACKING_PATH))
            .times(3)
            .respond_with(status_code(500)),
    );
    server.expect(
        Expectation::matching(request::method_path("GET", "/"))
            .times(2)
            .respond_with(status_code(503)),
    );

    let dir = tempdir().unwrap();
    let state = AppState::with_config(dir.path(), config_for(&server)).unwrap();
    let service = state.service();
    service.configure_campaign("acme", "main", &identity()).unwrap();

    let view = service.rankings("acme", "main").await.unwrap();

    assert_eq!(view.status, CacheStatus::Unavailable);
    assert_eq!(view.source, FetchSource::Failed);
    let error = view.error.unwrap();
    assert!(error.contains("all retrieval tiers failed"));
    assert!(!error.contains("integration-key"));

    let diagnostics = std::fs::read_to_string(dir.path().join("diagnostics.jsonl")).unwrap();
    assert!(!diagnostics.contains("integration-key"));
}

#[tokio::test]
async fn domain_lookup_never_calls_the_tracking_report() {
    let server = Server::run();
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", "/"),
            request::query(url_decoded(contains(("export_columns", "Ph,Po,Nq")))),
            request::query(url_decoded(contains(("database", "us")))),
        ])
        .times(1)
        .respond_with(status_code(200).body("compost bin|3|880\nworm farm|150|40\n")),
    );

    let dir = tempdir().unwrap();
    let state = AppState::with_config(dir.path(), config_for(&server)).unwrap();

    let view = state
        .service()
        .rankings_for_domain("example.com")
        .await
        .unwrap();

    assert_eq!(view.source, FetchSource::FallbackSimple);
    assert_eq!(view.keywords.len(), 1);
    assert_eq!(view.keywords[0].search_volume, 880);
}
