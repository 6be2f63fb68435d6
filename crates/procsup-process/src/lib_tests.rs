use super::*;

mod spawn_tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn resolve_path_with_slash_is_used_verbatim() {
        let (program, args) = resolve("/bin/echo", &["hi".to_string()]).unwrap();
        assert_eq!(program, "/bin/echo");
        assert_eq!(args, vec!["hi".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn resolve_bare_command_looks_up_path() {
        let result = resolve("echo", &[]);
        assert!(result.is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn resolve_unknown_command_fails() {
        let result = resolve("definitely-not-a-real-command-xyz", &[]);
        assert!(result.is_err());
    }

    #[test]
    fn validate_directory_rejects_missing_path() {
        let err = validate_directory("/definitely/does/not/exist/xyz").unwrap_err();
        assert!(matches!(err, procsup_core::ProcError::CommandExecution(_)));
    }

    #[test]
    fn validate_directory_accepts_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(validate_directory(dir.path().to_str().unwrap()).is_ok());
    }
}

mod registry_tests {
    use super::*;
    use procsup_core::{ProcessId, ProcessRecord, ProcessStatus, SpawnSpec};
    use std::collections::HashMap as StdHashMap;

    fn spec() -> SpawnSpec {
        SpawnSpec {
            command: "echo".into(),
            args: vec![],
            directory: "/tmp".into(),
            envs: StdHashMap::new(),
            encoding: "utf-8".into(),
            timeout_secs: None,
            labels: vec!["build".into()],
            description: None,
            stdin_data: None,
        }
    }

    #[tokio::test]
    async fn list_filters_by_status_and_labels() {
        let registry = Registry::new();
        let pid = ProcessId::try_from("aaaa1").unwrap();
        let record = ProcessRecord::new(pid.clone(), &spec(), chrono::Utc::now());
        registry.insert(record, 12345);

        let matches = registry.list(Some(ProcessStatus::Running), &["build".to_string()]).await;
        assert_eq!(matches.len(), 1);

        let no_match = registry.list(Some(ProcessStatus::Completed), &[]).await;
        assert!(no_match.is_empty());

        let label_miss = registry.list(None, &["other".to_string()]).await;
        assert!(label_miss.is_empty());
    }

    #[tokio::test]
    async fn info_on_unknown_pid_is_not_found() {
        let registry = Registry::new();
        let pid = ProcessId::try_from("zzzz9").unwrap();
        let err = registry.info(&pid).await.unwrap_err();
        assert!(matches!(err, procsup_core::ProcError::ProcessNotFound(_)));
    }

    #[test]
    fn known_ids_tracks_insertions_and_removals() {
        let registry = Registry::new();
        let pid = ProcessId::try_from("bbbb2").unwrap();
        let record = ProcessRecord::new(pid.clone(), &spec(), chrono::Utc::now());
        registry.insert(record, 1);
        assert!(registry.known_ids().contains(&pid));
        registry.remove(&pid);
        assert!(!registry.known_ids().contains(&pid));
    }
}

mod supervisor_tests {
    use super::*;
    use procsup_core::{ProcessId, ProcessStatus, SpawnSpec};
    use procsup_store::{GetOptions, Store};
    use std::collections::HashMap as StdHashMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    fn spec(command: &str, args: Vec<&str>, timeout_secs: Option<u64>) -> SpawnSpec {
        SpawnSpec {
            command: command.to_string(),
            args: args.into_iter().map(String::from).collect(),
            directory: std::env::temp_dir().to_string_lossy().to_string(),
            envs: StdHashMap::new(),
            encoding: "utf-8".to_string(),
            timeout_secs,
            labels: vec![],
            description: None,
            stdin_data: None,
        }
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn start_process_completes_successfully() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::new(dir.path()));
        let sup = Supervisor::new(store.clone(), None, -1);

        let record = sup
            .start_process(spec("/bin/echo", vec!["hello", "world"], Some(10)))
            .await
            .unwrap();

        timeout(Duration::from_secs(5), record.completed.notified())
            .await
            .expect("process should complete before timeout");

        let info = sup.get_process_info(&record.pid).await.unwrap();
        assert_eq!(info.status, ProcessStatus::Completed);
        assert_eq!(info.exit_code, Some(0));

        let out = store
            .get(&record.pid, procsup_core::StreamKey::Stdout, GetOptions::default())
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "hello world");
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn nonzero_exit_is_failed() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::new(dir.path()));
        let sup = Supervisor::new(store, None, -1);

        let record = sup
            .start_process(spec("/bin/false", vec![], Some(10)))
            .await
            .unwrap();
        timeout(Duration::from_secs(5), record.completed.notified())
            .await
            .unwrap();

        let info = sup.get_process_info(&record.pid).await.unwrap();
        assert_eq!(info.status, ProcessStatus::Failed);
        assert_eq!(info.exit_code, Some(1));
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn deadline_elapsed_is_terminated_with_timeout_message() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::new(dir.path()));
        let sup = Supervisor::new(store, None, -1);

        let record = sup
            .start_process(spec("/bin/sleep", vec!["30"], Some(1)))
            .await
            .unwrap();
        timeout(Duration::from_secs(5), record.completed.notified())
            .await
            .expect("deadline should fire well before 30s");

        let info = sup.get_process_info(&record.pid).await.unwrap();
        assert_eq!(info.status, ProcessStatus::Terminated);
        assert!(info.error_message.unwrap().contains("timed out"));
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn stop_process_force_terminates_running_child() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::new(dir.path()));
        let sup = Supervisor::new(store, None, -1);

        let record = sup
            .start_process(spec("/bin/sleep", vec!["30"], None))
            .await
            .unwrap();

        sup.stop_process(&record.pid, true, "test stop").await.unwrap();

        let info = sup.get_process_info(&record.pid).await.unwrap();
        assert_eq!(info.status, ProcessStatus::Terminated);
        assert_eq!(info.error_message.as_deref(), Some("test stop"));
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn stop_process_on_non_running_pid_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::new(dir.path()));
        let sup = Supervisor::new(store, None, -1);

        let record = sup
            .start_process(spec("/bin/echo", vec!["hi"], Some(10)))
            .await
            .unwrap();
        timeout(Duration::from_secs(5), record.completed.notified())
            .await
            .unwrap();

        sup.stop_process(&record.pid, true, "late stop").await.unwrap();
        let info = sup.get_process_info(&record.pid).await.unwrap();
        assert_eq!(info.status, ProcessStatus::Completed);
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn clean_processes_reports_all_three_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::new(dir.path()));
        let sup = Supervisor::new(store, None, -1);

        let done = sup
            .start_process(spec("/bin/echo", vec!["done"], Some(10)))
            .await
            .unwrap();
        timeout(Duration::from_secs(5), done.completed.notified())
            .await
            .unwrap();

        let running = sup
            .start_process(spec("/bin/sleep", vec!["30"], None))
            .await
            .unwrap();

        let unknown = ProcessId::try_from("zzzz1").unwrap();

        let outcomes = sup
            .clean_processes(&[done.pid.clone(), running.pid.clone(), unknown.clone()])
            .await;

        assert_eq!(outcomes[&done.pid], CleanOutcome::Success);
        assert_eq!(outcomes[&running.pid], CleanOutcome::StillRunning);
        assert_eq!(outcomes[&unknown], CleanOutcome::NotFound);

        sup.stop_process(&running.pid, true, "cleanup").await.unwrap();
    }
}
