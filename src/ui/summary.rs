use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table};
use is_terminal::IsTerminal;
use owo_colors::OwoColorize;
use std::time::Duration;

use crate::catalog::{ServiceCatalog, ServiceDefinition};
use crate::config::secrets::SecretRegistry;
use crate::orchestrator::{SlotState, StatusReport};
use crate::runtime::ResourceUsage;

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn print_indented(table: &Table) {
    for line in table.to_string().lines() {
        println!("  {}", line);
    }
}

pub fn format_gib(bytes: u64) -> String {
    format!("{:.1} GiB", bytes as f64 / (1u64 << 30) as f64)
}

/// Uptime rounded to whole seconds, e.g. `1h 2m 5s`.
pub fn format_uptime(uptime: Duration) -> String {
    humantime::format_duration(Duration::from_secs(uptime.as_secs())).to_string()
}

fn state_text(state: &SlotState, use_color: bool) -> String {
    let label = state.label();
    if !use_color {
        return format!("\u{25cf} {}", label);
    }
    match state {
        SlotState::Active(_) => format!("{} {}", "\u{25cf}".green(), label.green()),
        SlotState::Starting(_) | SlotState::Stopping(_) => {
            format!("{} {}", "\u{25cf}".yellow(), label.yellow())
        }
        SlotState::Unknown { .. } => format!("{} {}", "\u{25cf}".red(), label.red()),
        SlotState::Idle => format!("{} {}", "\u{25cb}".dimmed(), label.dimmed()),
    }
}

/// Catalog table in configuration order. `active` marks the running service.
pub fn print_catalog(
    catalog: &ServiceCatalog,
    active: Option<&str>,
    verbose: bool,
    secrets: &SecretRegistry,
) {
    let use_color = std::io::stdout().is_terminal();

    if catalog.is_empty() {
        println!("No services configured.");
        return;
    }

    let mut table = new_table();
    table.set_header(vec![
        Cell::new(""),
        Cell::new("Service"),
        Cell::new("Model"),
        Cell::new("Port").set_alignment(CellAlignment::Right),
        Cell::new("GPU memory"),
        Cell::new("Context").set_alignment(CellAlignment::Right),
        Cell::new("Description"),
    ]);

    for service in catalog.iter() {
        let is_active = active == Some(service.identifier.as_str());
        let marker = match (is_active, use_color) {
            (true, true) => "\u{25cf}".green().to_string(),
            (true, false) => "*".to_string(),
            (false, _) => String::new(),
        };
        let info = &service.info;
        table.add_row(vec![
            Cell::new(marker),
            Cell::new(&service.identifier),
            Cell::new(&info.model),
            Cell::new(service.launch.host_port).set_alignment(CellAlignment::Right),
            Cell::new(info.gpu_memory.as_deref().unwrap_or("-")),
            Cell::new(
                info.context_length
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            )
            .set_alignment(CellAlignment::Right),
            Cell::new(info.description.as_deref().unwrap_or("")),
        ]);
    }

    println!();
    print_indented(&table);

    if verbose {
        for service in catalog.iter() {
            print_service_details(service, secrets, use_color);
        }
    }
    println!();
}

fn print_service_details(service: &ServiceDefinition, secrets: &SecretRegistry, use_color: bool) {
    println!();
    if use_color {
        println!("  {}", service.identifier.bold());
    } else {
        println!("  {}", service.identifier);
    }
    let launch = &service.launch;
    println!("    image:      {}", launch.image);
    println!("    container:  {}", launch.container_name);
    println!("    api:        {}", service.api_base());
    println!("    readiness:  {}", service.readiness.probe_url);
    if !launch.command.is_empty() {
        println!("    command:    {}", secrets.mask_value(&launch.command.join(" ")));
    }
    for volume in &launch.volumes {
        println!("    volume:     {}", volume);
    }
    for (key, value) in &launch.env {
        println!("    env:        {}={}", key, secrets.mask_value(value));
    }
}

pub fn print_status(report: &StatusReport, catalog: &ServiceCatalog) {
    let use_color = std::io::stdout().is_terminal();

    println!();
    println!("  State:    {}", state_text(&report.state, use_color));
    if let Some(id) = &report.identifier {
        let model = catalog
            .get(id)
            .map(|s| s.info.served_model_name.as_str())
            .unwrap_or("-");
        println!("  Service:  {} ({})", id, model);
        if let Some(service) = catalog.get(id) {
            println!("  API:      {}", service.api_base());
        }
    }
    if let Some(uptime) = report.uptime {
        println!("  Uptime:   {}", format_uptime(uptime));
    }
    if let Some(status) = &report.runtime_status {
        println!("  Runtime:  {}", status);
    }
    if let SlotState::Unknown { reason, .. } = &report.state {
        println!("  Reason:   {}", reason);
        println!("  Run `llmslot stop` to clear the slot.");
    }
    if let Some(marker) = &report.transition {
        println!(
            "  Pending:  {} (since {})",
            marker,
            marker.started_at.format("%H:%M:%S")
        );
    }

    match &report.resources {
        Some(usage) => println!(
            "  GPU:      {} / {} ({}% util)",
            format_gib(usage.memory_used_bytes()),
            format_gib(usage.memory_total_bytes()),
            usage.max_utilization_percent()
        ),
        None => println!("  GPU:      unavailable (is nvidia-smi installed?)"),
    }
    println!();
}

pub fn print_resources(usage: &ResourceUsage) {
    println!();
    if usage.gpus.is_empty() {
        println!("  No GPUs reported.");
        println!();
        return;
    }

    let mut table = new_table();
    table.set_header(vec![
        Cell::new("GPU").set_alignment(CellAlignment::Right),
        Cell::new("Name"),
        Cell::new("Memory used").set_alignment(CellAlignment::Right),
        Cell::new("Memory total").set_alignment(CellAlignment::Right),
        Cell::new("Util").set_alignment(CellAlignment::Right),
    ]);
    for gpu in &usage.gpus {
        table.add_row(vec![
            Cell::new(gpu.index).set_alignment(CellAlignment::Right),
            Cell::new(&gpu.name),
            Cell::new(format_gib(gpu.memory_used_bytes)).set_alignment(CellAlignment::Right),
            Cell::new(format_gib(gpu.memory_total_bytes)).set_alignment(CellAlignment::Right),
            Cell::new(format!("{}%", gpu.utilization_percent)).set_alignment(CellAlignment::Right),
        ]);
    }
    print_indented(&table);
    println!();
}

/// One line per slot transition while a command runs. Settled states print
/// nothing.
pub fn print_progress(state: &SlotState) {
    let text = match state {
        SlotState::Starting(id) => format!("Starting {}...", id),
        SlotState::Stopping(id) => format!("Stopping {}...", id),
        _ => return,
    };
    if std::io::stdout().is_terminal() {
        println!("  {}", text.dimmed());
    } else {
        println!("  {}", text);
    }
}

/// Printed after a successful launch or switch.
pub fn print_ready(service: &ServiceDefinition) {
    let use_color = std::io::stdout().is_terminal();
    println!();
    if use_color {
        println!(
            "  {} {} is ready",
            "\u{2713}".green(),
            service.identifier.bold()
        );
    } else {
        println!("  {} is ready", service.identifier);
    }
    println!("    model: {}", service.info.served_model_name);
    println!("    api:   {}", service.api_base());
    println!();
}
