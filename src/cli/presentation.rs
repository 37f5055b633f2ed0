//! CLI presentation: text and json formatters per command.

use crate::error::UnitError;
use crate::orchestrator::{UnitHandle, UnitStatusView, UnitSummary};
use crate::unit::{LessonSummary, MediaAsset, UnitId};
use chrono::{TimeZone, Utc};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use serde::Serialize;

pub fn to_json<T: Serialize>(value: &T) -> Result<String, UnitError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| UnitError::InvalidArgument(format!("Failed to render JSON: {}", e)))
}

fn format_timestamp(ms: u64) -> String {
    Utc.timestamp_millis_opt(ms as i64)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "-".to_string())
}

pub fn format_unit_summary_text(summary: &UnitSummary) -> String {
    let mut out = format!(
        "Unit created: {}\n  Id: {}\n  Lessons: {}\n",
        summary.title, summary.unit_id, summary.lesson_count
    );
    if !summary.lessons.is_empty() {
        let mut table = Table::new();
        table.load_preset(UTF8_BORDERS_ONLY);
        table.set_header(vec!["#", "Lesson", "Id"]);
        for (i, lesson) in summary.lessons.iter().enumerate() {
            table.add_row(vec![
                (i + 1).to_string(),
                lesson.title.clone(),
                lesson.id.clone(),
            ]);
        }
        out.push_str(&format!("\n{}\n", table));
    }
    if !summary.failed_lessons.is_empty() {
        out.push_str(&format!(
            "\nSkipped lessons ({}):",
            summary.failed_lessons.len()
        ));
        for failure in &summary.failed_lessons {
            out.push_str(&format!(
                "\n  - {} (#{}): {}",
                failure.title,
                failure.index + 1,
                failure.message
            ));
        }
    }
    out.trim_end().to_string()
}

pub fn format_unit_handle_text(handle: &UnitHandle) -> String {
    format!(
        "Unit queued: {}\n  Id: {}\n  Status: {}",
        handle.title, handle.unit_id, handle.status
    )
}

pub fn format_status_text(view: &UnitStatusView) -> String {
    let mut out = format!(
        "{}\n  Id: {}\n  Status: {}\n  Lessons: {}\n",
        view.title, view.unit_id, view.status, view.lesson_count
    );
    if let Some(progress) = &view.progress {
        out.push_str(&format!(
            "  Progress: {} - {}\n",
            progress.stage.as_str(),
            progress.message
        ));
    }
    if let Some(error) = &view.error_message {
        out.push_str(&format!("  Error: {}\n", error));
    }
    if let Some(task) = &view.background_task {
        out.push_str(&format!("  Task: {} ({})\n", task.task_id, task.flow_name));
    }
    out.push_str(&format!(
        "  Art: {}\n  Podcast: {}\n  Updated: {}",
        if view.has_art { "yes" } else { "no" },
        if view.has_podcast { "yes" } else { "no" },
        format_timestamp(view.updated_at_ms)
    ));
    out
}

pub fn format_unit_list_text(views: &[UnitStatusView]) -> String {
    if views.is_empty() {
        return "No units.".to_string();
    }
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Id", "Title", "Status", "Lessons", "Updated"]);
    for view in views {
        table.add_row(vec![
            view.unit_id.to_string(),
            view.title.clone(),
            view.status.to_string(),
            view.lesson_count.to_string(),
            format_timestamp(view.updated_at_ms),
        ]);
    }
    table.to_string()
}

pub fn format_media_text(asset: &MediaAsset) -> String {
    let mut out = format!(
        "{} attached\n  Blob: {} ({}, {} bytes)",
        asset.kind, asset.blob.key, asset.blob.content_type, asset.blob.size
    );
    if !asset.description.is_empty() {
        out.push_str(&format!("\n  Description: {}", asset.description));
    }
    if let Some(seconds) = asset.duration_seconds {
        out.push_str(&format!("\n  Duration: {}s", seconds));
    }
    out
}

pub fn format_intro_text(asset: &MediaAsset, intro: &LessonSummary) -> String {
    format!(
        "{}\nIntro lesson: {} ({})",
        format_media_text(asset),
        intro.title,
        intro.id
    )
}

pub fn format_recovered_text(unit_ids: &[UnitId]) -> String {
    if unit_ids.is_empty() {
        return "No interrupted units.".to_string();
    }
    let mut lines = vec![format!("Marked {} interrupted unit(s) as failed:", unit_ids.len())];
    lines.extend(unit_ids.iter().map(|id| format!("  - {}", id)));
    lines.join("\n")
}
