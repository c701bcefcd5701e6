use crate::common::*;

#[tokio::test]
async fn stale_record_is_cleared() {
    let _slot = exclusive_slot().await;
    let ports = free_ports(4);
    let project = TestProject::new(&lifecycle_config("it-stale", &ports));
    let slug = project.slug("it-stale");

    // Simulate a crash between stop and clear
    let state_dir = project.dir.path().join(".llmslot");
    std::fs::create_dir_all(&state_dir).unwrap();
    std::fs::write(
        state_dir.join("active.json"),
        r#"{"current": "a", "since": "2025-01-01T00:00:00Z"}"#,
    )
    .unwrap();

    let out = llmslot(&project, &["current"]).await;
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).trim().is_empty());
    assert_eq!(project.recorded_service(), None);

    // And the slot can be used
    let out = llmslot(&project, &["launch", "b"]).await;
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    llmslot(&project, &["stop"]).await;

    docker_cleanup(&slug);
}

#[tokio::test]
async fn untracked_container_is_adopted() {
    let _slot = exclusive_slot().await;
    let ports = free_ports(4);
    let project = TestProject::new(&lifecycle_config("it-adopt", &ports));
    let slug = project.slug("it-adopt");

    let out = llmslot(&project, &["launch", "a"]).await;
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    // Lose the record; the running container is still labelled
    std::fs::remove_file(project.dir.path().join(".llmslot/active.json")).unwrap();

    let out = llmslot(&project, &["current"]).await;
    assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "a");
    assert_eq!(project.recorded_service().as_deref(), Some("a"));

    llmslot(&project, &["stop"]).await;
    docker_cleanup(&slug);
}

#[tokio::test]
async fn corrupted_record_is_healed() {
    let _slot = exclusive_slot().await;
    let ports = free_ports(4);
    let project = TestProject::new(&lifecycle_config("it-corrupt", &ports));
    let slug = project.slug("it-corrupt");

    let state_dir = project.dir.path().join(".llmslot");
    std::fs::create_dir_all(&state_dir).unwrap();
    std::fs::write(state_dir.join("active.json"), "{not json").unwrap();

    let out = llmslot(&project, &["current"]).await;
    assert!(out.status.success());
    assert!(state_dir.join("active.json.corrupt").exists());

    docker_cleanup(&slug);
}
