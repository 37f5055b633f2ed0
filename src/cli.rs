//! CLI domain: parse, route, output, and presentation only.
//! No domain orchestration; single route table dispatches to the orchestrator.

mod output;
mod parse;
mod presentation;
mod route;

pub use output::map_error;
pub use parse::{Cli, Commands};
pub use presentation::{
    format_intro_text, format_media_text, format_recovered_text, format_status_text,
    format_unit_handle_text, format_unit_list_text, format_unit_summary_text, to_json,
};
pub use route::RunContext;
