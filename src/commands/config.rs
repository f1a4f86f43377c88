use anyhow::Result;

use crate::Context;
use crate::cli::ConfigCommand;
use crate::config::BsaConfig;
use crate::paths;
use crate::ui;

pub fn run(_ctx: &Context, cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show => show(),
    }
}

fn show() -> Result<()> {
    ui::header("Configuration");

    let config_file = paths::config_file()?;
    println!();
    ui::kv("Config file", &config_file.display().to_string());
    ui::kv("Service list", &paths::state_file()?.display().to_string());
    ui::kv("Scheduled tasks", &paths::tasks_file()?.display().to_string());
    if !config_file.exists() {
        ui::dim("Config file not found, showing defaults");
    }

    let config = BsaConfig::load()?;

    println!();
    ui::info("service_list");
    ui::kv("top_level_types", &join_or_none(&config.service_list.top_level_types));
    ui::kv("target_sublayers", &join_or_none(&config.service_list.target_sublayers));
    ui::kv("fingerprint", &config.settings_fingerprint()[..16]);

    println!();
    ui::info("diff_checking");
    if config.diff_checking.wildcards.is_empty() {
        ui::dim("No wildcards configured");
    }
    for (pattern, index) in config.wildcard_table().entries() {
        ui::kv(&format!("wildcard {index}"), pattern);
    }

    println!();
    ui::info("executor");
    let mut command = config.executor.command.clone();
    for arg in &config.executor.args {
        command.push(' ');
        command.push_str(arg);
    }
    ui::kv("command", &command);
    ui::kv(
        "batch_budget",
        &format!("{}s", config.batch_budget().num_seconds()),
    );

    println!();
    ui::info("schedule");
    ui::kv(
        "default_interval",
        &format!("{}s", config.schedule.default_interval_secs),
    );

    if !config.aliases.is_empty() {
        println!();
        ui::info("aliases");
        for (service_type, prefix) in &config.aliases {
            ui::kv(service_type, prefix);
        }
    }

    Ok(())
}

fn join_or_none(values: &[String]) -> String {
    if values.is_empty() {
        "(none)".to_string()
    } else {
        values.join(", ")
    }
}
