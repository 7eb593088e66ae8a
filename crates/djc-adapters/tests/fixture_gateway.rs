use std::path::PathBuf;

use djc_adapters::{AdapterContext, FixtureGateway, SourceGateway};
use djc_core::SourcePlatform;
use uuid::Uuid;

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/public_alio")
}

#[tokio::test]
async fn recorded_public_data_fixtures_load() {
    let gateway = FixtureGateway::from_dir(SourcePlatform::PublicAlio, fixtures_dir()).unwrap();
    let ctx = AdapterContext::new(Uuid::new_v4());

    let page = gateway.fetch_listing(&ctx, 0, 100).await.unwrap();
    assert!(page.success);
    assert_eq!(page.total_count, 3);
    let ids: Vec<_> = page
        .summaries
        .iter()
        .filter_map(|s| s.natural_id().map(str::to_string))
        .collect();
    assert_eq!(ids, vec!["281734", "281801", "281822"]);

    for id in &ids {
        let detail = gateway.fetch_detail(&ctx, id).await.unwrap();
        assert!(detail.success, "detail fixture for {id}");
        let record = detail.detail.unwrap();
        assert_eq!(record.natural_id(), Some(id.as_str()));
    }
    assert_eq!(gateway.detail_requests().await, ids);
}

#[tokio::test]
async fn detail_fixture_carries_long_form_text_and_files() {
    let gateway = FixtureGateway::from_dir(SourcePlatform::PublicAlio, fixtures_dir()).unwrap();
    let ctx = AdapterContext::new(Uuid::new_v4());

    let record = gateway
        .fetch_detail(&ctx, "281734")
        .await
        .unwrap()
        .detail
        .unwrap();
    assert_eq!(record.process.as_deref(), Some("서류전형 - 필기전형 - 면접전형"));
    assert_eq!(record.attachments.len(), 2);
    assert_eq!(record.start_date.as_deref(), Some("20990301"));
}
