use crate::runtime::Runtime;
use colored::Colorize;
use hostflow_cloud::CatalogKind;

pub async fn handle(runtime: &Runtime, kind: CatalogKind) -> anyhow::Result<()> {
    let options = runtime.service.list_catalog(kind).await?;

    if options.is_empty() {
        println!("{}", format!("No {} options offered", kind).dimmed());
        return Ok(());
    }

    println!("{}", format!("{:<20} {}", "NAME", "DESCRIPTION").bold());
    println!("{}", "─".repeat(60).dimmed());
    for option in options.iter() {
        println!("{} {}", format!("{:<20}", option.name).cyan(), option.description);
    }
    Ok(())
}
