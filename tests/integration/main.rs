//! Integration tests for aclsync

mod flow_tests {
    use aclsync::access::{AccessLevel, TeamRole};
    use aclsync::cache::{CacheStore, MemoryCache};
    use aclsync::config::Config;
    use aclsync::consumer::CacheUpdater;
    use aclsync::events::{
        AssetAction, AssetEvent, AssetType, Broker, EventPublisher, MemoryBroker,
    };
    use aclsync::service::{Backend, Caller, Services};
    use aclsync::store::MemoryAclStore;
    use aclsync::AclError;
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    struct World {
        store: Arc<MemoryAclStore>,
        broker: MemoryBroker,
        publisher: EventPublisher,
        cache: Arc<MemoryCache>,
        services: Services,
        config: Config,
    }

    impl World {
        fn new() -> Self {
            let config = Config::default();
            let store = Arc::new(MemoryAclStore::new());
            let broker = MemoryBroker::new(4);
            let cache = Arc::new(MemoryCache::new());
            let publisher =
                EventPublisher::start(Arc::new(broker.clone()), &config.broker, &config.publisher);
            let backend = Backend::from_store(store.clone(), publisher.clone())
                .with_team_cache(cache.clone(), &config.cache);
            Self {
                store,
                broker,
                publisher,
                cache,
                services: Services::new(backend),
                config,
            }
        }

        /// Flush the publisher and apply everything to the projections
        async fn sync(&self) -> CacheUpdater {
            assert!(self.publisher.shutdown(Duration::from_secs(2)).await);
            let updater =
                CacheUpdater::new(Arc::new(self.broker.clone()), self.cache.clone(), &self.config);
            updater.drain().await.unwrap();
            updater
        }
    }

    #[tokio::test]
    async fn team_manager_lifecycle() {
        let w = World::new();
        let owner = w.store.new_user();
        let manager = w.store.new_user();
        let member = w.store.new_user();
        let teams = &w.services.teams;

        let team = teams
            .create(&Caller::new(owner), "platform", &[], &[member])
            .await
            .unwrap();
        teams
            .add_manager(&Caller::new(owner), team.id, manager)
            .await
            .unwrap();
        let auth = Backend::from_store(w.store.clone(), EventPublisher::disabled()).authorizer();
        assert_eq!(
            auth.effective_team_role(team.id, manager).await.unwrap(),
            TeamRole::Manager
        );

        let err = teams
            .remove_manager(&Caller::new(manager), team.id, manager)
            .await
            .unwrap_err();
        assert!(matches!(err, AclError::Forbidden(_)));

        teams
            .remove_manager(&Caller::new(owner), team.id, manager)
            .await
            .unwrap();
        assert_eq!(
            auth.effective_team_role(team.id, manager).await.unwrap(),
            TeamRole::None
        );

        let updater = w.sync().await;
        let roster = updater.members().members(team.id).await.unwrap();
        assert_eq!(roster.get(&owner), Some(&TeamRole::Owner));
        assert_eq!(roster.get(&member), Some(&TeamRole::Member));
        assert!(!roster.contains_key(&manager));
    }

    #[tokio::test]
    async fn folder_reshare_updates_in_place() {
        let w = World::new();
        let owner = w.store.new_user();
        let reader = w.store.new_user();
        let folders = &w.services.folders;
        let caller = Caller::new(owner);
        let folder = folders.create(&caller, "handbook").await.unwrap();
        let auth = Backend::from_store(w.store.clone(), EventPublisher::disabled()).authorizer();

        assert_eq!(
            auth.folder_access(folder.id, owner).await.unwrap(),
            AccessLevel::Owner
        );
        folders
            .share(&caller, folder.id, reader, AccessLevel::Read)
            .await
            .unwrap();
        assert_eq!(
            auth.folder_access(folder.id, reader).await.unwrap(),
            AccessLevel::Read
        );
        folders
            .share(&caller, folder.id, reader, AccessLevel::Write)
            .await
            .unwrap();
        assert_eq!(
            auth.folder_access(folder.id, reader).await.unwrap(),
            AccessLevel::Write
        );
        assert_eq!(w.store.folder_share_count(folder.id, reader), 1);

        let updater = w.sync().await;
        assert_eq!(
            updater.acl().get_user_access(folder.id, reader).await.unwrap(),
            Some(AccessLevel::Write)
        );
    }

    #[tokio::test]
    async fn note_inherits_folder_share() {
        let w = World::new();
        let owner = w.store.new_user();
        let editor = w.store.new_user();
        let caller = Caller::new(owner);
        let folder = w.services.folders.create(&caller, "specs").await.unwrap();
        let note = w
            .services
            .notes
            .create(&caller, folder.id, "rollout", "")
            .await
            .unwrap();
        w.services
            .folders
            .share(&caller, folder.id, editor, AccessLevel::Write)
            .await
            .unwrap();

        let auth = Backend::from_store(w.store.clone(), EventPublisher::disabled()).authorizer();
        assert_eq!(
            auth.note_access(note.id, editor).await.unwrap(),
            AccessLevel::Write
        );
        w.services
            .notes
            .update(&Caller::new(editor), note.id, "rollout v2", "steps")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn team_cache_reflects_writes() {
        let w = World::new();
        let owner = w.store.new_user();
        let joiner = w.store.new_user();
        let teams = &w.services.teams;
        let caller = Caller::new(owner);
        let team = teams.create(&caller, "infra", &[], &[]).await.unwrap();

        // Populate the cache, then write behind it
        teams.get(&caller, team.id).await.unwrap();
        assert!(w
            .cache
            .get(&aclsync::cache::keys::team(team.id))
            .await
            .unwrap()
            .is_some());
        teams.add_members(&caller, team.id, &[joiner]).await.unwrap();

        let seen = teams.get(&Caller::new(joiner), team.id).await.unwrap();
        assert_eq!(seen.role_of(joiner), TeamRole::Member);

        // Outage falls through to the store
        w.cache.set_unavailable(true);
        let seen = teams.get(&caller, team.id).await.unwrap();
        assert_eq!(seen.member_ids().len(), 2);
    }

    #[tokio::test]
    async fn folder_shared_event_reaches_acl_cache() {
        let config = Config::default();
        let broker = MemoryBroker::new(2);
        let cache = Arc::new(MemoryCache::new());
        let publisher =
            EventPublisher::start(Arc::new(broker.clone()), &config.broker, &config.publisher);

        let asset = Uuid::new_v4();
        let owner = Uuid::new_v4();
        let reader = Uuid::new_v4();
        let event = AssetEvent::new(AssetType::Folder, AssetAction::Shared, asset, owner, owner)
            .with_target(reader)
            .with_level(AccessLevel::Write);
        publisher.publish_asset(&event).await;
        assert!(publisher.shutdown(Duration::from_secs(2)).await);

        let updater = CacheUpdater::new(Arc::new(broker.clone()), cache.clone(), &config);
        let stats = updater.drain().await.unwrap();
        assert_eq!(stats.processed, 1);
        assert_eq!(
            updater.acl().get_user_access(asset, reader).await.unwrap(),
            Some(AccessLevel::Write)
        );
        assert_eq!(
            cache
                .hget(&aclsync::cache::keys::asset_acl(asset), &reader.to_string())
                .await
                .unwrap()
                .as_deref(),
            Some("WRITE")
        );
        assert_eq!(broker.lag(&config.broker.asset_topic, &config.broker.group_id), 0);
    }

    #[tokio::test]
    async fn duplicate_note_share_is_idempotent() {
        let config = Config::default();
        let broker = MemoryBroker::new(1);
        let cache = Arc::new(MemoryCache::new());
        let asset = Uuid::new_v4();
        let owner = Uuid::new_v4();
        let reader = Uuid::new_v4();
        let payload = serde_json::to_string(
            &AssetEvent::new(AssetType::Note, AssetAction::Shared, asset, owner, owner)
                .with_target(reader)
                .with_level(AccessLevel::Read),
        )
        .unwrap();
        for _ in 0..2 {
            broker
                .publish(&config.broker.asset_topic, &asset.to_string(), &payload)
                .await
                .unwrap();
        }

        let updater = CacheUpdater::new(Arc::new(broker.clone()), cache, &config);
        let stats = updater.drain().await.unwrap();
        assert_eq!(stats.processed, 2);
        let acl = updater.acl().get_asset_acl(asset).await.unwrap();
        assert_eq!(acl.len(), 1);
        assert_eq!(acl.get(&reader), Some(&AccessLevel::Read));
    }

    #[tokio::test]
    async fn poison_event_goes_to_dead_letter_topic() {
        let config = Config::default();
        let broker = MemoryBroker::new(1);
        let cache = Arc::new(MemoryCache::new());
        broker
            .publish(&config.broker.asset_topic, "k", "{not json")
            .await
            .unwrap();

        let updater = CacheUpdater::new(Arc::new(broker.clone()), cache, &config);
        let stats = updater.drain().await.unwrap();
        assert_eq!(stats.dead_lettered, 1);

        let dlq = config.consumer.dead_letter_topic(&config.broker.asset_topic);
        let records = broker.records(&dlq);
        assert_eq!(records.len(), 1);
        let dead: serde_json::Value = serde_json::from_str(&records[0].payload).unwrap();
        assert_eq!(dead["payload"], "{not json");
        assert_eq!(broker.lag(&config.broker.asset_topic, &config.broker.group_id), 0);
    }
}

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn aclsync() -> Command {
        let mut cmd = cargo_bin_cmd!("aclsync");
        cmd.env_remove("ACLSYNC_CONFIG");
        cmd
    }

    /// Config pointing the spool and snapshot into `dir`
    fn write_config(dir: &Path) -> PathBuf {
        let path = dir.join("config.toml");
        let content = format!(
            "[broker]\nspool_dir = '{}'\npartitions = 2\n\n[consumer]\nsnapshot_path = '{}'\nmax_retries = 0\n",
            dir.join("spool").display(),
            dir.join("snapshot.json").display()
        );
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn help_displays() {
        aclsync()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("event-synchronized ACL cache"));
    }

    #[test]
    fn version_displays() {
        aclsync()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("aclsync"));
    }

    #[test]
    fn config_path() {
        aclsync()
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());
        aclsync()
            .env("ACLSYNC_CONFIG", &config)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[broker]").and(predicate::str::contains("team.activity")));
    }

    #[test]
    fn config_set_then_show() {
        let temp = TempDir::new().unwrap();
        let config = temp.path().join("config.toml");
        aclsync()
            .arg("--config")
            .arg(&config)
            .args(["config", "set", "broker.group_id", "audit-readers"])
            .assert()
            .success();
        aclsync()
            .arg("--config")
            .arg(&config)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("audit-readers"));
    }

    #[test]
    fn invalid_config_shows_hint() {
        let temp = TempDir::new().unwrap();
        let config = temp.path().join("config.toml");
        std::fs::write(&config, "[cache]\nacl_ttl_secs = \"forever\"\n").unwrap();
        aclsync()
            .arg("--config")
            .arg(&config)
            .arg("status")
            .assert()
            .failure()
            .stderr(predicate::str::contains("config init --force"));
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());
        let id = uuid::Uuid::new_v4().to_string();
        aclsync()
            .env("ACLSYNC_CONFIG", &config)
            .args(["publish", "asset", "--type", "FOLDER_ARCHIVED", "--asset"])
            .arg(&id)
            .arg("--owner")
            .arg(&id)
            .assert()
            .failure()
            .stderr(predicate::str::contains("unknown asset event type"));
    }

    #[test]
    fn publish_consume_inspect() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());
        let asset = uuid::Uuid::new_v4().to_string();
        let owner = uuid::Uuid::new_v4().to_string();
        let reader = uuid::Uuid::new_v4().to_string();

        aclsync()
            .env("ACLSYNC_CONFIG", &config)
            .args(["publish", "asset", "--type", "FOLDER_SHARED", "--level", "WRITE"])
            .args(["--asset", asset.as_str(), "--owner", owner.as_str()])
            .args(["--target", reader.as_str()])
            .assert()
            .success();

        aclsync()
            .env("ACLSYNC_CONFIG", &config)
            .args(["consume", "--drain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("1 events applied"));

        aclsync()
            .env("ACLSYNC_CONFIG", &config)
            .args(["inspect", "acl", asset.as_str(), "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains(reader.as_str()).and(predicate::str::contains("WRITE")));

        aclsync()
            .env("ACLSYNC_CONFIG", &config)
            .args(["status", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("asset.changes\t1\t0"));
    }

    #[test]
    fn share_without_level_is_dead_lettered() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());
        let asset = uuid::Uuid::new_v4().to_string();

        aclsync()
            .env("ACLSYNC_CONFIG", &config)
            .args(["publish", "asset", "--type", "NOTE_SHARED"])
            .args(["--asset", asset.as_str(), "--owner", asset.as_str()])
            .assert()
            .success();

        aclsync()
            .env("ACLSYNC_CONFIG", &config)
            .args(["consume", "--drain", "--topic", "asset"])
            .assert()
            .success()
            .stdout(predicate::str::contains("1 events dead-lettered"));

        aclsync()
            .env("ACLSYNC_CONFIG", &config)
            .args(["status", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("asset.changes.dlq"));
    }

    fn publish_member_added(config: &Path, team: &str, user: &str) {
        aclsync()
            .env("ACLSYNC_CONFIG", config)
            .args(["publish", "team", "--type", "MEMBER_ADDED"])
            .args(["--team", team, "--by", team, "--target", user])
            .assert()
            .success();
    }

    #[test]
    fn failed_drain_keeps_committed_projection() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());
        let team = uuid::Uuid::new_v4().to_string();
        let member = uuid::Uuid::new_v4().to_string();
        let asset = uuid::Uuid::new_v4().to_string();

        publish_member_added(&config, &team, &member);
        aclsync()
            .env("ACLSYNC_CONFIG", &config)
            .args(["publish", "asset", "--type", "NOTE_SHARED"])
            .args(["--asset", asset.as_str(), "--owner", asset.as_str()])
            .assert()
            .success();

        // A plain file where the dead-letter topic directory belongs
        let blocker = temp.path().join("spool").join("asset.changes.dlq");
        std::fs::write(&blocker, "").unwrap();
        aclsync()
            .env("ACLSYNC_CONFIG", &config)
            .args(["consume", "--drain"])
            .assert()
            .failure();
        assert!(temp.path().join("snapshot.json").exists());

        std::fs::remove_file(&blocker).unwrap();
        aclsync()
            .env("ACLSYNC_CONFIG", &config)
            .args(["consume", "--drain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("1 events dead-lettered"));

        aclsync()
            .env("ACLSYNC_CONFIG", &config)
            .args(["inspect", "team", team.as_str(), "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains(member.as_str()).and(predicate::str::contains("MEMBER")));
    }

    #[test]
    fn lost_snapshot_replays_committed_events() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());
        let team = uuid::Uuid::new_v4().to_string();
        let member = uuid::Uuid::new_v4().to_string();
        publish_member_added(&config, &team, &member);

        aclsync()
            .env("ACLSYNC_CONFIG", &config)
            .args(["consume", "--drain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("1 events applied"));

        // Offsets are committed but the projection never reached disk
        std::fs::remove_file(temp.path().join("snapshot.json")).unwrap();
        aclsync()
            .env("ACLSYNC_CONFIG", &config)
            .args(["consume", "--drain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("1 events applied"));

        aclsync()
            .env("ACLSYNC_CONFIG", &config)
            .args(["inspect", "team", team.as_str(), "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains(format!("{}\tMEMBER", member)));
    }

    #[test]
    fn inspect_without_snapshot_fails() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());
        let team = uuid::Uuid::new_v4().to_string();
        aclsync()
            .env("ACLSYNC_CONFIG", &config)
            .args(["inspect", "team", team.as_str()])
            .assert()
            .failure()
            .stderr(predicate::str::contains("aclsync consume"));
    }
}
