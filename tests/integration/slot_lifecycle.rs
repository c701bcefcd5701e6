use crate::common::*;

#[tokio::test]
async fn launch_switch_stop() {
    let _slot = exclusive_slot().await;
    let ports = free_ports(4);
    let project = TestProject::new(&lifecycle_config("it-lifecycle", &ports));
    let slug = project.slug("it-lifecycle");
    let container_a = format!("llmslot-{slug}-a");
    let container_b = format!("llmslot-{slug}-b");

    let out = llmslot(&project, &["launch", "a"]).await;
    assert!(out.status.success(), "launch failed: {}", String::from_utf8_lossy(&out.stderr));
    assert!(container_running(&container_a));
    assert_eq!(project.recorded_service().as_deref(), Some("a"));

    let out = llmslot(&project, &["current"]).await;
    assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "a");

    // A second launch is refused while a is active
    let out = llmslot(&project, &["launch", "b"]).await;
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("already active"));
    assert!(!container_running(&container_b));

    let out = llmslot(&project, &["switch", "b"]).await;
    assert!(out.status.success(), "switch failed: {}", String::from_utf8_lossy(&out.stderr));
    assert!(!container_running(&container_a));
    assert!(container_running(&container_b));
    assert_eq!(project.recorded_service().as_deref(), Some("b"));

    // Stopping a service that is not active leaves b alone
    let out = llmslot(&project, &["stop", "a"]).await;
    assert!(out.status.success());
    assert!(container_running(&container_b));

    let out = llmslot(&project, &["stop"]).await;
    assert!(out.status.success());
    assert!(!container_running(&container_b));
    assert_eq!(project.recorded_service(), None);

    // Idempotent
    let out = llmslot(&project, &["stop"]).await;
    assert!(out.status.success());

    // Logs survive the stop
    let out = llmslot(&project, &["logs", "b", "--lines", "5"]).await;
    assert!(out.status.success());

    docker_cleanup(&slug);
}

#[tokio::test]
async fn second_project_cannot_take_the_gpu() {
    let _slot = exclusive_slot().await;
    let first = TestProject::new(&lifecycle_config("it-first", &free_ports(4)));
    let second = TestProject::new(&lifecycle_config("it-second", &free_ports(4)));
    let first_slug = first.slug("it-first");
    let second_slug = second.slug("it-second");

    let out = llmslot(&first, &["launch", "a"]).await;
    assert!(out.status.success(), "launch failed: {}", String::from_utf8_lossy(&out.stderr));

    let out = llmslot(&second, &["launch", "b"]).await;
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("already active"), "got: {stderr}");
    assert!(stderr.contains(&format!("{first_slug}/a")), "got: {stderr}");
    assert!(!container_running(&format!("llmslot-{second_slug}-b")));

    let out = llmslot(&first, &["stop"]).await;
    assert!(out.status.success());
    let out = llmslot(&second, &["launch", "b"]).await;
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    llmslot(&second, &["stop"]).await;

    docker_cleanup(&first_slug);
    docker_cleanup(&second_slug);
}
