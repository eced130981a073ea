use courier_chats::{ChatError, ChatId, MessageId, MessageStatus, MessageStore, UserId};
use courier_config::DatabaseConfig;
use courier_store::{prepare_database, run_migrations, SqliteStore};
use tempfile::TempDir;

type TestResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

struct TestContext {
    store: SqliteStore,
    _temp_dir: TempDir,
}

impl TestContext {
    async fn new() -> TestResult<Self> {
        let temp_dir = TempDir::new()?;
        let config = DatabaseConfig {
            url: format!("sqlite://{}", temp_dir.path().join("store.sqlite").display()),
            max_connections: 4,
        };
        let pool = prepare_database(&config).await?;
        run_migrations(&pool).await?;

        Ok(Self {
            store: SqliteStore::new(pool),
            _temp_dir: temp_dir,
        })
    }
}

fn users(names: &[&str]) -> Vec<UserId> {
    names.iter().map(|name| UserId::from(*name)).collect()
}

#[tokio::test]
async fn create_chat_persists_members() -> TestResult {
    let ctx = TestContext::new().await?;
    let room = ctx.store.create_chat(users(&["bob", "alice", "bob"])).await?;

    assert_eq!(room.participants, users(&["alice", "bob"]));
    assert_eq!(ctx.store.participants_of(&room.id).await?, users(&["alice", "bob"]));
    Ok(())
}

#[tokio::test]
async fn participants_of_unknown_chat_is_not_found() -> TestResult {
    let ctx = TestContext::new().await?;
    let err = ctx
        .store
        .participants_of(&ChatId::from("missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::ChatNotFound { .. }));
    Ok(())
}

#[tokio::test]
async fn created_messages_round_trip_through_find() -> TestResult {
    let ctx = TestContext::new().await?;
    let room = ctx.store.create_chat(users(&["alice", "bob"])).await?;

    let created = ctx
        .store
        .create_message(&UserId::from("alice"), &room.id, "hi")
        .await?;
    assert_eq!(created.status, MessageStatus::Sending);

    let found = ctx.store.find_message(&created.id).await?.expect("message exists");
    assert_eq!(found.id, created.id);
    assert_eq!(found.content, "hi");
    assert_eq!(found.sender, UserId::from("alice"));
    assert_eq!(
        found.created_at.timestamp_micros(),
        created.created_at.timestamp_micros()
    );

    assert!(ctx.store.find_message(&MessageId::from("nope")).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn create_message_rejects_blank_content_and_unknown_chat() -> TestResult {
    let ctx = TestContext::new().await?;
    let room = ctx.store.create_chat(users(&["alice"])).await?;

    let blank = ctx
        .store
        .create_message(&UserId::from("alice"), &room.id, "   ")
        .await
        .unwrap_err();
    assert!(matches!(blank, ChatError::Validation { .. }));

    let missing = ctx
        .store
        .create_message(&UserId::from("alice"), &ChatId::from("ghost"), "hi")
        .await
        .unwrap_err();
    assert!(matches!(missing, ChatError::ChatNotFound { .. }));
    Ok(())
}

#[tokio::test]
async fn update_status_is_monotonic() -> TestResult {
    let ctx = TestContext::new().await?;
    let room = ctx.store.create_chat(users(&["alice", "bob"])).await?;
    let message = ctx
        .store
        .create_message(&UserId::from("alice"), &room.id, "hi")
        .await?;

    ctx.store.update_status(&message.id, MessageStatus::Sent).await?;
    ctx.store.update_status(&message.id, MessageStatus::Read).await?;
    ctx.store.update_status(&message.id, MessageStatus::Delivered).await?;
    ctx.store.update_status(&message.id, MessageStatus::Failed).await?;

    let stored = ctx.store.find_message(&message.id).await?.expect("message exists");
    assert_eq!(stored.status, MessageStatus::Read);

    let err = ctx
        .store
        .update_status(&MessageId::from("ghost"), MessageStatus::Sent)
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::MessageNotFound { .. }));
    Ok(())
}

#[tokio::test]
async fn history_returns_latest_messages_in_persistence_order() -> TestResult {
    let ctx = TestContext::new().await?;
    let room = ctx.store.create_chat(users(&["alice", "bob"])).await?;

    for body in ["one", "two", "three"] {
        ctx.store
            .create_message(&UserId::from("alice"), &room.id, body)
            .await?;
    }

    let history = ctx.store.history(&room.id, 2).await?;
    let bodies: Vec<_> = history.iter().map(|message| message.content.as_str()).collect();
    assert_eq!(bodies, vec!["two", "three"]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_status_writes_keep_the_furthest_status() -> TestResult {
    let ctx = TestContext::new().await?;
    let room = ctx.store.create_chat(users(&["alice", "bob"])).await?;

    for _ in 0..10 {
        let mut ids = Vec::new();
        for _ in 0..8 {
            let message = ctx
                .store
                .create_message(&UserId::from("alice"), &room.id, "hi")
                .await?;
            ids.push(message.id);
        }

        let mut writes = Vec::new();
        for id in &ids {
            for status in [MessageStatus::Delivered, MessageStatus::Read] {
                let store = ctx.store.clone();
                let id = id.clone();
                writes.push(tokio::spawn(async move {
                    store.update_status(&id, status).await
                }));
            }
        }
        for write in writes {
            write.await??;
        }

        for id in &ids {
            let stored = ctx.store.find_message(id).await?.expect("message exists");
            assert_eq!(stored.status, MessageStatus::Read, "read lost for {id}");
        }
    }
    Ok(())
}
