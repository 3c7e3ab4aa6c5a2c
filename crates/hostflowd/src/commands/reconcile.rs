use crate::runtime::Runtime;
use colored::Colorize;
use tokio_util::sync::CancellationToken;

pub async fn handle(runtime: &Runtime) -> anyhow::Result<()> {
    println!("{}", "Comparing provider servers with local state...".blue());

    let report = runtime.reconciler().sweep(&CancellationToken::new()).await?;

    println!("  Checked: {} server(s)", report.checked);
    if report.is_clean() {
        println!("{}", "✓ Provider and local state agree".green());
        return Ok(());
    }

    for id in &report.adopted {
        println!("  {} {}", "adopted".green(), id);
    }
    for id in &report.orphans {
        println!("  {} {}", "orphan ".yellow(), id);
    }
    for id in &report.drifted {
        println!("  {} {}", "drifted".red(), id);
    }

    if !report.orphans.is_empty() {
        println!();
        println!(
            "{}",
            "Orphaned servers are not deleted automatically; remove them at the provider if unwanted."
                .dimmed()
        );
    }
    Ok(())
}
