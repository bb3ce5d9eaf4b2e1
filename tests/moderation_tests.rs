mod common;

use common::{create_user, test_pool};

use bastion_server::db;
use bastion_server::db::moderation::{NewAction, NewBanRule};
use bastion_server::models::{ActionType, DeleteMode};

#[tokio::test]
async fn offline_action_stays_pending_until_enforced() {
    let pool = test_pool().await;
    let target = create_user(&pool, "bob").await;
    let moderator = create_user(&pool, "mod").await;

    let action = db::moderation::create_action(
        &pool,
        NewAction {
            target_user_id: target.id,
            moderator_user_id: moderator.id,
            action_type: ActionType::Kick,
            reason: Some("noise"),
            delete_mode: DeleteMode::Hours,
            delete_hours: Some(1),
            blacklist_identity: false,
            blacklist_ip: false,
            target_ip: None,
        },
    )
    .await
    .unwrap();

    assert!(!action.enforced);
    assert!(action.enforced_at.is_none());

    let pending = db::moderation::pending_for_user(&pool, target.id).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, action.id);

    db::moderation::mark_enforced(&pool, action.id).await.unwrap();
    let action = db::moderation::get_action(&pool, action.id).await.unwrap();
    assert!(action.enforced);
    assert!(action.enforced_at.is_some());

    assert!(db::moderation::pending_for_user(&pool, target.id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn enforced_bit_is_write_once() {
    let pool = test_pool().await;
    let target = create_user(&pool, "carol").await;
    let moderator = create_user(&pool, "mod2").await;

    let action = db::moderation::create_action(
        &pool,
        NewAction {
            target_user_id: target.id,
            moderator_user_id: moderator.id,
            action_type: ActionType::Kick,
            reason: None,
            delete_mode: DeleteMode::None,
            delete_hours: None,
            blacklist_identity: false,
            blacklist_ip: false,
            target_ip: None,
        },
    )
    .await
    .unwrap();

    db::moderation::mark_enforced(&pool, action.id).await.unwrap();
    let first = db::moderation::get_action(&pool, action.id).await.unwrap();

    db::moderation::mark_enforced(&pool, action.id).await.unwrap();
    let second = db::moderation::get_action(&pool, action.id).await.unwrap();

    assert_eq!(first.enforced_at, second.enforced_at);
}

#[tokio::test]
async fn identity_ban_matches_user_id_and_public_key() {
    let pool = test_pool().await;
    let target = create_user(&pool, "dave").await;
    let moderator = create_user(&pool, "mod3").await;

    db::moderation::create_ban_rule(
        &pool,
        NewBanRule {
            target_user_id: Some(target.id),
            target_public_key: Some(&target.public_key),
            target_ip: Some("203.0.113.7"),
            blacklist_identity: true,
            blacklist_ip: false,
            reason: Some("spam"),
            moderator_user_id: Some(moderator.id),
        },
    )
    .await
    .unwrap();

    // Matched by user id alone.
    assert!(db::moderation::find_active_ban(&pool, Some(target.id), None, None)
        .await
        .unwrap()
        .is_some());

    // Matched by public key alone (at-connect evaluation has no user id).
    assert!(
        db::moderation::find_active_ban(&pool, None, Some(&target.public_key), None)
            .await
            .unwrap()
            .is_some()
    );

    // The IP alone must NOT match: blacklist_ip is off.
    assert!(
        db::moderation::find_active_ban(&pool, None, None, Some("203.0.113.7"))
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn ip_ban_matches_other_identities_from_same_address() {
    let pool = test_pool().await;
    let target = create_user(&pool, "eve").await;
    let moderator = create_user(&pool, "mod4").await;

    db::moderation::create_ban_rule(
        &pool,
        NewBanRule {
            target_user_id: Some(target.id),
            target_public_key: Some(&target.public_key),
            target_ip: Some("203.0.113.7"),
            blacklist_identity: true,
            blacklist_ip: true,
            reason: None,
            moderator_user_id: Some(moderator.id),
        },
    )
    .await
    .unwrap();

    // A different public key connecting from the banned address matches.
    let rule = db::moderation::find_active_ban(&pool, None, Some("pk:someone-else"), Some("203.0.113.7"))
        .await
        .unwrap()
        .expect("ip match");
    assert!(rule.blacklist_ip);

    // A different key from a different address does not.
    assert!(
        db::moderation::find_active_ban(&pool, None, Some("pk:someone-else"), Some("198.51.100.1"))
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn most_recent_matching_rule_wins() {
    let pool = test_pool().await;
    let target = create_user(&pool, "frank").await;

    db::moderation::create_ban_rule(
        &pool,
        NewBanRule {
            target_user_id: Some(target.id),
            target_public_key: Some(&target.public_key),
            target_ip: None,
            blacklist_identity: true,
            blacklist_ip: false,
            reason: Some("first"),
            moderator_user_id: None,
        },
    )
    .await
    .unwrap();

    // Later rule for the same identity.
    db::moderation::create_ban_rule(
        &pool,
        NewBanRule {
            target_user_id: Some(target.id),
            target_public_key: Some(&target.public_key),
            target_ip: None,
            blacklist_identity: true,
            blacklist_ip: false,
            reason: Some("second"),
            moderator_user_id: None,
        },
    )
    .await
    .unwrap();

    let rule = db::moderation::find_active_ban(&pool, Some(target.id), None, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rule.reason.as_deref(), Some("second"));
}

#[tokio::test]
async fn ban_rule_requires_at_least_one_blacklist() {
    let pool = test_pool().await;
    let target = create_user(&pool, "grace").await;

    let result = db::moderation::create_ban_rule(
        &pool,
        NewBanRule {
            target_user_id: Some(target.id),
            target_public_key: None,
            target_ip: None,
            blacklist_identity: false,
            blacklist_ip: false,
            reason: None,
            moderator_user_id: None,
        },
    )
    .await;

    assert!(result.is_err());
}
