//! Gem management over batch RPCs

use crate::integration::mock_server::{MockServerFixture, BATCH_PATH, LANDING_PAGE};
use gemini_web_core::client::{GemCatalog, SessionState};
use gemini_web_core::Error;
use serde_json::{json, Value};

fn list_part(identifier: &str, gems: Value) -> Value {
    json!(["wrb.fr", "CNgdBe", json!([null, null, gems]).to_string(), null, null, null, identifier])
}

#[tokio::test]
async fn test_fetch_create_delete_gems() {
    let fixture = MockServerFixture::new().await;
    let _landing = fixture.mock_landing_page(LANDING_PAGE).await;
    let list = fixture
        .mock_batch(
            "CNgdBe,CNgdBe",
            &[json!([
                list_part(
                    "system",
                    json!([["coding-partner", ["Coding partner", "Helps with code"], ["You write code."]]])
                ),
                list_part("custom", json!([["c_9", ["Travel", "Plans trips"], null]])),
            ])],
        )
        .await;
    let create = fixture
        .mock_batch(
            "oMH3Zd",
            &[json!([["wrb.fr", "oMH3Zd", json!(["new-gem-1"]).to_string()]])],
        )
        .await;
    let delete = fixture
        .mock_batch("UXcSJb", &[json!([["wrb.fr", "UXcSJb", "[]"]])])
        .await;

    let catalog = GemCatalog::new(fixture.session());
    assert!(matches!(catalog.gems(), Err(Error::Validation(_))));

    let jar = catalog.fetch_gems(false, "en").await.unwrap();
    list.assert_async().await;
    assert_eq!(jar.len(), 2);
    let system = jar.get(None, Some("Coding partner")).unwrap();
    assert!(system.predefined);
    assert_eq!(system.prompt.as_deref(), Some("You write code."));
    assert!(!jar.get(Some("c_9"), None).unwrap().predefined);

    let gem = catalog.create_gem("Poet", "Answer in verse.", "Rhymes").await.unwrap();
    create.assert_async().await;
    assert_eq!(gem.id, "new-gem-1");
    assert_eq!(catalog.gems().unwrap().len(), 3);

    catalog.delete_gem(&gem).await.unwrap();
    delete.assert_async().await;
    assert!(catalog.gems().unwrap().get(Some("new-gem-1"), None).is_none());
}

#[tokio::test]
async fn test_unexpected_gem_listing_closes_session() {
    let fixture = MockServerFixture::new().await;
    let _landing = fixture.mock_landing_page(LANDING_PAGE).await;
    let _list = fixture
        .mock_batch(
            "CNgdBe,CNgdBe",
            &[json!([list_part("system", json!([])), list_part("custom", json!([]))])],
        )
        .await;

    let catalog = GemCatalog::new(fixture.session());
    let err = catalog.fetch_gems(true, "en").await.unwrap_err();
    assert!(matches!(err, Error::Protocol { .. }));
    assert_eq!(catalog.session().state(), SessionState::Closed);
}

#[tokio::test]
async fn test_batch_error_status_is_typed() {
    let fixture = MockServerFixture::new().await;
    let _landing = fixture.mock_landing_page(LANDING_PAGE).await;
    let _batch = fixture.mock_error_response(BATCH_PATH, 429).await;

    let catalog = GemCatalog::new(fixture.session());
    let err = catalog.fetch_gems(false, "en").await.unwrap_err();
    assert!(matches!(err, Error::RateLimitExceeded { .. }));
}
