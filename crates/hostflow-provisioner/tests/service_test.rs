mod common;

use common::{Harness, TENANT, spec};
use futures_util::future::join_all;
use hostflow_cloud::CatalogKind;
use hostflow_provisioner::{
    NewResource, Operation, ProvisionError, ResourceStatus, ResourceStore, TaskQueue,
};

#[tokio::test]
async fn test_enqueue_provisioning_writes_resource_and_task() {
    let h = Harness::new();
    let resource = h.request("web").await;

    assert_eq!(resource.status, ResourceStatus::Queued);
    assert_eq!(resource.tenant_id, TENANT);
    assert_eq!(resource.size, "cx22");
    assert_eq!(resource.provider_resource_id, None);

    let pending = h.store.outbox_pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].task.resource_id, resource.id);
    assert_eq!(pending[0].task.operation, Operation::Create);
}

#[tokio::test]
async fn test_incomplete_request_is_rejected() {
    let h = Harness::new();
    let mut incomplete = spec("web");
    incomplete.image = String::new();

    let err = h
        .service
        .enqueue_provisioning(NewResource::new(TENANT, "user-1", incomplete))
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::InvalidRequest(_)));
    assert!(h.store.list(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_relay_dispatches_immediately() {
    let h = Harness::new();
    let service = h.dispatching_service();

    service
        .enqueue_provisioning(NewResource::new(TENANT, "user-1", spec("web")))
        .await
        .unwrap();

    assert_eq!(h.queue.stats().await.unwrap().default, 1);
    assert!(h.store.outbox_pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_request_survives_queue_outage() {
    let h = Harness::new();
    let service = h.dispatching_service();
    h.queue.set_available(false).await;

    let resource = service
        .enqueue_provisioning(NewResource::new(TENANT, "user-1", spec("web")))
        .await
        .unwrap();

    assert_eq!(h.store.outbox_pending().await.unwrap().len(), 1);

    h.queue.set_available(true).await;
    h.relay.dispatch_pending().await.unwrap();
    let delivery = h.queue.dequeue().await.unwrap().unwrap();
    assert_eq!(delivery.task.resource_id, resource.id);
}

#[tokio::test]
async fn test_resize_requires_ready_resource() {
    let h = Harness::new();
    let resource = h.request("web").await;

    let err = h
        .service
        .enqueue_resize(&resource.id, "cx32")
        .await
        .unwrap_err();
    assert!(matches!(err, ProvisionError::InvalidRequest(_)));

    let ready = h.provision("db").await;
    let task = h.service.enqueue_resize(&ready.id, "cx32").await.unwrap();
    assert_eq!(task.payload.target_size.as_deref(), Some("cx32"));
}

#[tokio::test]
async fn test_delete_of_deleted_resource_is_rejected() {
    let h = Harness::new();
    let resource = h.provision("web").await;
    let task = h.service.enqueue_delete(&resource.id).await.unwrap();
    h.orchestrator.handle(&task, &h.cancel).await.unwrap();

    let err = h.service.enqueue_delete(&resource.id).await.unwrap_err();
    assert!(matches!(err, ProvisionError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_retry_failed_requeues_with_fresh_task() {
    let h = Harness::new();
    let resource = h.request("web").await;
    let first = h.pending_task(&resource.id, Operation::Create).await;
    h.store.outbox_complete(&first.task_id).await.unwrap();
    h.set_status(&resource.id, ResourceStatus::Failed).await;

    let queued = h.service.retry_failed(&resource.id).await.unwrap();
    assert_eq!(queued.status, ResourceStatus::Queued);
    assert_eq!(queued.last_error, None);
    assert_eq!(queued.attempts, 0);

    let retry = h.pending_task(&resource.id, Operation::Create).await;
    assert_ne!(retry.task_id, first.task_id);

    let outcome = h.orchestrator.handle(&retry, &h.cancel).await.unwrap();
    assert_eq!(
        outcome,
        hostflow_provisioner::Outcome::Completed(ResourceStatus::Ready)
    );
}

#[tokio::test]
async fn test_retry_of_ready_resource_is_rejected() {
    let h = Harness::new();
    let resource = h.provision("web").await;

    let err = h.service.retry_failed(&resource.id).await.unwrap_err();
    assert!(matches!(err, ProvisionError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_get_resource_status_reads_store() {
    let h = Harness::new();
    let resource = h.request("web").await;

    let status = h.service.get_resource_status(&resource.id).await.unwrap();
    assert_eq!(status, resource);

    let err = h.service.get_resource_status("missing").await.unwrap_err();
    assert!(matches!(
        err,
        ProvisionError::Store(hostflow_provisioner::StoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_list_resources_by_tenant() {
    let h = Harness::new();
    h.request("a").await;
    h.request("b").await;
    h.service
        .enqueue_provisioning(NewResource::new("tenant-2", "user-2", spec("c")))
        .await
        .unwrap();

    assert_eq!(h.service.list_resources(Some(TENANT)).await.unwrap().len(), 2);
    assert_eq!(h.service.list_resources(None).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_live_status_is_cached_at_rest() {
    let h = Harness::new();
    let resource = h.provision("web").await;
    let before = h.provider.get_calls();

    let first = h.service.live_status(&resource.id).await.unwrap().unwrap();
    let second = h.service.live_status(&resource.id).await.unwrap().unwrap();

    assert_eq!(first, second);
    assert_eq!(h.provider.get_calls() - before, 1);
}

#[tokio::test]
async fn test_live_status_bypasses_cache_while_transient() {
    let h = Harness::new();
    let resource = h.provision("web").await;
    h.set_status(&resource.id, ResourceStatus::Resizing).await;
    let before = h.provider.get_calls();

    h.service.live_status(&resource.id).await.unwrap();
    h.service.live_status(&resource.id).await.unwrap();

    assert_eq!(h.provider.get_calls() - before, 2);
}

#[tokio::test]
async fn test_live_status_without_server() {
    let h = Harness::new();
    let resource = h.request("web").await;
    assert_eq!(h.service.live_status(&resource.id).await.unwrap(), None);

    let ready = h.provision("db").await;
    h.provider
        .remove_server(ready.provider_resource_id.as_deref().unwrap());
    assert_eq!(h.service.live_status(&ready.id).await.unwrap(), None);
}

#[tokio::test]
async fn test_concurrent_catalog_reads_make_one_call() {
    let h = Harness::new();

    let reads = (0..100).map(|_| h.service.list_catalog(CatalogKind::Size));
    let results = join_all(reads).await;

    for result in results {
        assert_eq!(result.unwrap().len(), 3);
    }
    assert_eq!(h.provider.catalog_calls(), 1);
}
