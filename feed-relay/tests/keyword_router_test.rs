mod common;

use common::{init_tracing, message, RecordingDestination};
use feed_relay::{
    Attachment, DeliveryError, DeliveryOutcome, KeywordDelivery, KeywordRouter, MemoryStore, Result, SubscriptionStore,
};
use std::sync::Arc;

const GENERAL: &str = "general";
const UPDATES: &str = "updates";
const ANNOUNCEMENTS: &str = "announcements";

struct Harness {
    store: Arc<MemoryStore>,
    destinations: Arc<RecordingDestination>,
    router: KeywordRouter,
}

async fn harness(delivery: KeywordDelivery, keywords: &[(&str, &str)]) -> Result<Harness> {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    for (keyword, channel) in keywords {
        store.add_keyword_subscription(keyword, channel, "guild").await?;
    }
    let destinations = Arc::new(RecordingDestination::new());
    let router = KeywordRouter::new(store.clone(), destinations.clone(), delivery);
    Ok(Harness {
        store,
        destinations,
        router,
    })
}

#[tokio::test]
async fn message_is_forwarded_to_every_matching_channel() -> Result<()> {
    let h = harness(
        KeywordDelivery::PerDestination,
        &[("update", UPDATES), ("important", ANNOUNCEMENTS)],
    )
    .await?;

    let attempts = h
        .router
        .route(&message("m1", GENERAL, "this is an important update"))
        .await;

    assert_eq!(attempts.len(), 2);
    assert!(attempts.iter().all(|a| a.is_delivered()));

    let mut channels = h.destinations.channels();
    channels.sort();
    assert_eq!(channels, vec![ANNOUNCEMENTS, UPDATES]);

    let (_, forwarded) = &h.destinations.deliveries()[0];
    assert_eq!(forwarded.content.as_deref(), Some("this is an important update"));

    let log = h.store.delivery_log().await;
    assert_eq!(log.len(), 2);
    assert!(log.iter().all(|entry| entry.source_channel_id == GENERAL && entry.source_message_id == "m1"));
    Ok(())
}

#[tokio::test]
async fn matching_ignores_case() -> Result<()> {
    let h = harness(KeywordDelivery::PerDestination, &[("Release", UPDATES)]).await?;

    let attempts = h.router.route(&message("m1", GENERAL, "NEW RELEASES OUT")).await;
    assert_eq!(attempts.len(), 1);
    assert_eq!(h.destinations.channels(), vec![UPDATES]);
    Ok(())
}

#[tokio::test]
async fn message_is_not_forwarded_into_its_own_channel() -> Result<()> {
    let h = harness(
        KeywordDelivery::PerDestination,
        &[("update", UPDATES), ("important", ANNOUNCEMENTS)],
    )
    .await?;

    let attempts = h.router.route(&message("m1", UPDATES, "important update")).await;

    let skipped: Vec<_> = attempts
        .iter()
        .filter(|a| a.outcome == DeliveryOutcome::SkippedOrigin)
        .collect();
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].channel_id, UPDATES);
    assert_eq!(h.destinations.channels(), vec![ANNOUNCEMENTS]);
    Ok(())
}

#[tokio::test]
async fn missing_channel_does_not_block_other_deliveries() -> Result<()> {
    let h = harness(
        KeywordDelivery::PerDestination,
        &[("update", UPDATES), ("important", ANNOUNCEMENTS)],
    )
    .await?;
    h.destinations.remove_channel(UPDATES);

    let attempts = h
        .router
        .route(&message("m1", GENERAL, "this is an important update"))
        .await;

    let failed = attempts.iter().find(|a| a.channel_id == UPDATES).unwrap();
    assert_eq!(
        failed.outcome,
        DeliveryOutcome::Failed(DeliveryError::NotFound {
            channel_id: UPDATES.to_string()
        })
    );
    assert_eq!(h.destinations.channels(), vec![ANNOUNCEMENTS]);
    assert_eq!(h.store.delivery_log().await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn bot_and_direct_messages_are_ignored() -> Result<()> {
    let h = harness(KeywordDelivery::PerDestination, &[("update", UPDATES)]).await?;

    let mut from_bot = message("m1", GENERAL, "update");
    from_bot.author_is_bot = true;
    assert!(h.router.route(&from_bot).await.is_empty());

    let mut direct = message("m2", "dm", "update");
    direct.guild_id = None;
    assert!(h.router.route(&direct).await.is_empty());

    assert!(h.destinations.deliveries().is_empty());
    Ok(())
}

#[tokio::test]
async fn keywords_are_scoped_to_their_guild() -> Result<()> {
    let h = harness(KeywordDelivery::PerDestination, &[("update", UPDATES)]).await?;

    let mut elsewhere = message("m1", GENERAL, "update");
    elsewhere.guild_id = Some("other-guild".to_string());
    assert!(h.router.route(&elsewhere).await.is_empty());
    Ok(())
}

#[tokio::test]
async fn delivery_mode_decides_duplicate_posts() -> Result<()> {
    let keywords = [("important", ANNOUNCEMENTS), ("update", ANNOUNCEMENTS)];

    let per_rule = harness(KeywordDelivery::PerRule, &keywords).await?;
    per_rule.router.route(&message("m1", GENERAL, "important update")).await;
    assert_eq!(per_rule.destinations.deliveries().len(), 2);

    let per_destination = harness(KeywordDelivery::PerDestination, &keywords).await?;
    let attempts = per_destination
        .router
        .route(&message("m1", GENERAL, "important update"))
        .await;
    assert_eq!(per_destination.destinations.deliveries().len(), 1);
    assert_eq!(attempts[0].keywords, vec!["important", "update"]);
    // Every matched keyword is still recorded.
    assert_eq!(per_destination.store.delivery_log().await.len(), 2);
    Ok(())
}

#[tokio::test]
async fn attachments_are_forwarded() -> Result<()> {
    let h = harness(KeywordDelivery::PerDestination, &[("screenshot", UPDATES)]).await?;

    let mut with_file = message("m1", GENERAL, "screenshot attached");
    with_file.attachments.push(Attachment {
        url: "https://cdn.example.com/shot.png".to_string(),
        filename: "shot.png".to_string(),
        content_type: Some("image/png".to_string()),
    });
    h.router.route(&with_file).await;

    let (_, forwarded) = &h.destinations.deliveries()[0];
    assert_eq!(forwarded.attachments, with_file.attachments);
    Ok(())
}

#[tokio::test]
async fn transient_failure_is_reported_and_not_retried() -> Result<()> {
    let h = harness(
        KeywordDelivery::PerDestination,
        &[("update", UPDATES), ("important", ANNOUNCEMENTS)],
    )
    .await?;
    h.destinations.fail_deliveries_to(UPDATES);

    let attempts = h
        .router
        .route(&message("m1", GENERAL, "this is an important update"))
        .await;

    let failed = attempts.iter().find(|a| a.channel_id == UPDATES).unwrap();
    match &failed.outcome {
        DeliveryOutcome::Failed(e) => assert!(!e.is_permanent()),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(h.destinations.channels(), vec![ANNOUNCEMENTS]);

    // Routing happens once per observed message; recovering the channel sends nothing.
    h.destinations.recover(UPDATES);
    assert_eq!(h.destinations.channels(), vec![ANNOUNCEMENTS]);
    Ok(())
}
