mod common;

use common::{Harness, fast_retry};
use hostflow_provisioner::{Reconciler, ResourceStatus};
use std::time::Duration;

fn reconciler(h: &Harness) -> Reconciler {
    Reconciler::new(
        h.store.clone(),
        h.provider.clone(),
        h.audit.clone(),
        fast_retry(),
        Duration::from_secs(1),
    )
}

#[tokio::test]
async fn test_consistent_state_is_clean() {
    let h = Harness::new();
    h.provision("a").await;
    h.provision("b").await;

    let report = reconciler(&h).sweep(&h.cancel).await.unwrap();

    assert_eq!(report.checked, 2);
    assert!(report.is_clean(), "{:?}", report);
}

#[tokio::test]
async fn test_unrecorded_server_is_adopted() {
    let h = Harness::new();
    let resource = h.request("a").await;
    h.set_status(&resource.id, ResourceStatus::Provisioning).await;
    let server = h.provider.insert_server(Some(&resource.id), "cx22");

    let report = reconciler(&h).sweep(&h.cancel).await.unwrap();

    assert_eq!(report.adopted, vec![resource.id.clone()]);
    let adopted = h.get(&resource.id).await;
    assert_eq!(adopted.provider_resource_id, Some(server));
    assert_eq!(adopted.status, ResourceStatus::Provisioning);
}

#[tokio::test]
async fn test_orphans_are_reported_not_deleted() {
    let h = Harness::new();
    let unlabelled = h.provider.insert_server(None, "cx22");
    let unknown = h.provider.insert_server(Some("no-such-resource"), "cx22");

    let failed = h.request("a").await;
    h.set_status(&failed.id, ResourceStatus::Failed).await;
    let leftover = h.provider.insert_server(Some(&failed.id), "cx22");

    let report = reconciler(&h).sweep(&h.cancel).await.unwrap();

    let mut expected = vec![unlabelled, unknown, leftover];
    expected.sort();
    assert_eq!(report.orphans, expected);
    assert_eq!(h.provider.server_count(), 3);
    assert_eq!(h.provider.delete_calls(), 0);
}

#[tokio::test]
async fn test_server_of_deleted_resource_is_orphan() {
    let h = Harness::new();
    let resource = h.provision("a").await;
    h.set_status(&resource.id, ResourceStatus::Deleting).await;
    h.set_status(&resource.id, ResourceStatus::Deleted).await;

    let report = reconciler(&h).sweep(&h.cancel).await.unwrap();

    assert_eq!(
        report.orphans,
        vec![resource.provider_resource_id.clone().unwrap()]
    );
}

#[tokio::test]
async fn test_missing_server_is_reported_as_drift() {
    let h = Harness::new();
    let resource = h.provision("a").await;
    h.provider
        .remove_server(resource.provider_resource_id.as_deref().unwrap());

    let report = reconciler(&h).sweep(&h.cancel).await.unwrap();

    assert_eq!(report.drifted, vec![resource.id.clone()]);
    // Reported only
    assert_eq!(h.get(&resource.id).await.status, ResourceStatus::Ready);
    assert!(
        h.audit
            .for_resource(&resource.id)
            .iter()
            .any(|e| e.message.starts_with("drift"))
    );
}
