use crate::runtime::Runtime;
use colored::{ColoredString, Colorize};
use hostflow_cloud::ServerSpec;
use hostflow_provisioner::{ManagedResource, NewResource, ResourceStatus};

pub async fn create(
    runtime: &Runtime,
    tenant: String,
    owner: String,
    spec: ServerSpec,
    wait: bool,
) -> anyhow::Result<()> {
    let resource = runtime
        .service
        .enqueue_provisioning(NewResource::new(tenant, owner, spec))
        .await?;
    println!("{} {}", "✓ Requested".green(), resource.id.cyan());

    finish(runtime, &resource.id, wait).await
}

pub async fn delete(runtime: &Runtime, id: &str, wait: bool) -> anyhow::Result<()> {
    runtime.service.enqueue_delete(id).await?;
    println!("{} {}", "✓ Deletion requested for".green(), id.cyan());

    finish(runtime, id, wait).await
}

pub async fn resize(runtime: &Runtime, id: &str, size: &str, wait: bool) -> anyhow::Result<()> {
    runtime.service.enqueue_resize(id, size).await?;
    println!(
        "{} {} → {}",
        "✓ Resize requested for".green(),
        id.cyan(),
        size.cyan()
    );

    finish(runtime, id, wait).await
}

pub async fn retry(runtime: &Runtime, id: &str, wait: bool) -> anyhow::Result<()> {
    runtime.service.retry_failed(id).await?;
    println!("{} {}", "✓ Requeued".green(), id.cyan());

    finish(runtime, id, wait).await
}

pub async fn status(runtime: &Runtime, id: &str, live: bool) -> anyhow::Result<()> {
    let resource = runtime.service.get_resource_status(id).await?;
    print_resource(&resource);

    if live {
        println!();
        match runtime.service.live_status(id).await? {
            Some(server) => {
                println!("Provider:");
                println!("  Server:  {} ({})", server.name, server.provider_resource_id);
                println!("  Status:  {}", server.status);
                println!("  Size:    {}", server.size);
                println!(
                    "  Address: {}",
                    server.public_address.as_deref().unwrap_or("-")
                );
            }
            None => println!("{}", "No server at the provider".dimmed()),
        }
    }

    Ok(())
}

pub async fn list(runtime: &Runtime, tenant: Option<&str>) -> anyhow::Result<()> {
    let resources = runtime.service.list_resources(tenant).await?;

    if resources.is_empty() {
        println!("{}", "No resources".dimmed());
        return Ok(());
    }

    println!(
        "{}",
        format!(
            "{:<38} {:<14} {:<20} {:<8} {:<16}",
            "ID", "STATUS", "NAME", "SIZE", "ADDRESS"
        )
        .bold()
    );
    println!("{}", "─".repeat(98).dimmed());

    for resource in &resources {
        println!(
            "{:<38} {} {:<20} {:<8} {:<16}",
            resource.id,
            colorize(resource.status),
            resource.spec.name,
            resource.size,
            resource.public_address.as_deref().unwrap_or("-"),
        );
    }

    println!();
    println!("{} resource(s)", resources.len());
    Ok(())
}

async fn finish(runtime: &Runtime, id: &str, wait: bool) -> anyhow::Result<()> {
    if !wait {
        println!(
            "{}",
            "The request is processed by the next running `hostflowd run`".dimmed()
        );
        return Ok(());
    }

    println!("{}", "Processing...".blue());
    runtime.drain().await?;

    let resource = runtime.service.get_resource_status(id).await?;
    println!();
    print_resource(&resource);

    if resource.status == ResourceStatus::Failed {
        anyhow::bail!("{} failed", id);
    }
    Ok(())
}

fn print_resource(resource: &ManagedResource) {
    println!("{}", resource.id.bold());
    println!("  Status:   {}", colorize(resource.status));
    println!("  Tenant:   {}", resource.tenant_id);
    println!("  Owner:    {}", resource.owner_id);
    println!("  Provider: {}", resource.provider);
    println!("  Name:     {}", resource.spec.name);
    println!("  Size:     {}", resource.size);
    println!("  Location: {}", resource.spec.location);
    println!("  Image:    {}", resource.spec.image);
    println!(
        "  Server:   {}",
        resource.provider_resource_id.as_deref().unwrap_or("-")
    );
    println!(
        "  Address:  {}",
        resource.public_address.as_deref().unwrap_or("-")
    );
    println!("  Updated:  {}", resource.updated_at.to_rfc3339());
    if let Some(error) = &resource.last_error {
        println!("  Error:    {}", error.red());
    }
}

fn colorize(status: ResourceStatus) -> ColoredString {
    let text = format!("{:<14}", status.as_str());
    match status {
        ResourceStatus::Ready => text.green(),
        ResourceStatus::Failed => text.red(),
        ResourceStatus::Deleted => text.dimmed(),
        ResourceStatus::Queued => text.blue(),
        _ => text.yellow(),
    }
}
