use std::io::IsTerminal;

use acepro_engine::{FilamentInfo, Slot, UnitStatus};
use acepro_transport::PortInfo;
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn hex_color(color: [u8; 3]) -> String {
    format!("#{:02X}{:02X}{:02X}", color[0], color[1], color[2])
}

#[derive(Serialize)]
struct PortOutput {
    index: usize,
    path: String,
    product: Option<String>,
    location: Option<String>,
}

pub fn print_ports(ports: &[PortInfo], format: OutputFormat) {
    let rows: Vec<PortOutput> = ports
        .iter()
        .enumerate()
        .map(|(index, port)| PortOutput {
            index,
            path: port.path.display().to_string(),
            product: port.product.clone(),
            location: port.location.clone(),
        })
        .collect();

    match format {
        OutputFormat::Json => print_json(&rows),
        OutputFormat::Table => {
            let mut table = new_table(vec!["UNIT", "PATH", "PRODUCT", "LOCATION"]);
            for row in &rows {
                table.add_row(vec![
                    row.index.to_string(),
                    row.path.clone(),
                    row.product.clone().unwrap_or_default(),
                    row.location.clone().unwrap_or_default(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            if rows.is_empty() {
                println!("No ACE Pro units found.");
            }
            for row in &rows {
                println!(
                    "unit {}: {} ({})",
                    row.index,
                    row.path,
                    row.product.as_deref().unwrap_or("unknown product")
                );
            }
        }
        OutputFormat::Raw => {
            for row in &rows {
                println!("{}", row.path);
            }
        }
    }
}

pub fn print_status(unit: usize, status: &UnitStatus, format: OutputFormat) {
    match format {
        OutputFormat::Json | OutputFormat::Raw => print_json(status),
        OutputFormat::Table => {
            println!("ACE {unit}: {}", status.status);
            let mut table = new_table(vec!["SLOT", "STATUS", "MATERIAL", "COLOR", "RFID"]);
            for slot in &status.slots {
                let color = slot
                    .color
                    .as_deref()
                    .filter(|c| c.len() >= 3)
                    .map(|c| hex_color([c[0], c[1], c[2]]))
                    .unwrap_or_default();
                table.add_row(vec![
                    slot.index.to_string(),
                    slot.status.clone(),
                    slot.material.clone(),
                    color,
                    slot.rfid.map(|r| r.to_string()).unwrap_or_default(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("ACE {unit}:");
            println!("  Status:      {}", status.status);
            if let Some(action) = status.action.as_deref().filter(|a| !a.is_empty()) {
                println!("  Action:      {action}");
            }
            if let Some(temp) = status.temp {
                println!("  Temperature: {temp:.0} C");
            }
            if let Some(dryer) = &status.dryer {
                println!("  Dryer:       {dryer}");
            }
            for slot in &status.slots {
                println!("  Slot {}:      {} {}", slot.index, slot.status, slot.material);
            }
        }
    }
}

pub fn print_slots(unit: usize, slots: &[Slot], format: OutputFormat) {
    match format {
        OutputFormat::Json | OutputFormat::Raw => print_json(&slots),
        OutputFormat::Table => {
            let mut table = new_table(vec!["TOOL", "SLOT", "STATUS", "MATERIAL", "COLOR", "TEMP", "RFID"]);
            for (index, slot) in slots.iter().enumerate() {
                table.add_row(vec![
                    format!("T{}", acepro_engine::UnitRegistry::tool_index(unit, index)),
                    index.to_string(),
                    slot.status.to_string(),
                    slot.material.clone(),
                    hex_color(slot.color),
                    slot.temp.to_string(),
                    if slot.rfid { "yes" } else { "no" }.to_string(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for (index, slot) in slots.iter().enumerate() {
                println!(
                    "T{} ({}): {} {} {} {} C",
                    acepro_engine::UnitRegistry::tool_index(unit, index),
                    slot.status,
                    slot.material,
                    hex_color(slot.color),
                    slot.temp,
                    slot.sku.as_deref().unwrap_or("")
                );
            }
        }
    }
}

pub fn print_filament_info(slot: usize, info: &FilamentInfo, format: OutputFormat) {
    match format {
        OutputFormat::Json | OutputFormat::Raw => print_json(info),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("Slot {slot}:");
            println!("  Material: {}", info.material);
            println!("  Brand:    {}", info.brand);
            println!("  SKU:      {}", info.sku);
            if let Some(range) = info.extruder_temp {
                println!("  Nozzle:   {}-{} C", range.min, range.max);
            }
            if let Some(range) = info.hotbed_temp {
                println!("  Bed:      {}-{} C", range.min, range.max);
            }
            if let Some(diameter) = info.diameter {
                println!("  Diameter: {diameter:.2} mm");
            }
        }
    }
}

pub fn print_value(value: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Pretty | OutputFormat::Table => {
            println!(
                "{}",
                serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Json | OutputFormat::Raw => print_json(value),
    }
}

/// One-line acknowledgement for commands without a payload.
pub fn print_done(what: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({ "ok": true, "action": what })),
        OutputFormat::Raw => {}
        OutputFormat::Table | OutputFormat::Pretty => println!("{what}: ok"),
    }
}
