use crate::common::*;

#[tokio::test]
async fn readiness_timeout_leaves_nothing_running() {
    let _slot = exclusive_slot().await;
    let ports = free_ports(4);
    let project = TestProject::new(&lifecycle_config("it-timeout", &ports));
    let slug = project.slug("it-timeout");

    let out = llmslot(&project, &["launch", "slow"]).await;
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("did not become ready"), "got: {stderr}");

    assert!(!container_running(&format!("llmslot-{slug}-slow")));
    assert_eq!(project.recorded_service(), None);

    // The slot is free again
    let out = llmslot(&project, &["launch", "a"]).await;
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    llmslot(&project, &["stop"]).await;

    docker_cleanup(&slug);
}

#[tokio::test]
async fn out_of_memory_exit_is_reported_as_resource_exhaustion() {
    let _slot = exclusive_slot().await;
    let ports = free_ports(4);
    let project = TestProject::new(&lifecycle_config("it-oom", &ports));
    let slug = project.slug("it-oom");

    let out = llmslot(&project, &["launch", "oom"]).await;
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("insufficient resources"), "got: {stderr}");
    assert_eq!(project.recorded_service(), None);

    docker_cleanup(&slug);
}
