//! Inline keyboards
//!
//! Callback data uses the same prefixes the conversation parser understands:
//! `gov_`, `select_student_`, `share_` plus the fixed menu actions.

use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

use crate::directory::Student;
use crate::utils::truncate_str;

const BUTTON_LABEL_MAX: usize = 30;

/// Main menu: the two search entry points
#[must_use]
pub fn main_menu() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback("🔎 الاسم", "search_name"),
        InlineKeyboardButton::callback("🆔 الرقم الامتحاني", "search_examno"),
    ]])
}

/// Governorate picker, two per row, with a back button
#[must_use]
pub fn governorates(governorates: &[String]) -> InlineKeyboardMarkup {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = governorates
        .chunks(2)
        .map(|pair| {
            pair.iter()
                .map(|gov| InlineKeyboardButton::callback(gov.clone(), format!("gov_{gov}")))
                .collect()
        })
        .collect();

    rows.push(vec![InlineKeyboardButton::callback(
        "🔙 العودة للقائمة الرئيسية",
        "main_menu",
    )]);

    InlineKeyboardMarkup::new(rows)
}

/// Selection list for a multi-match name search
#[must_use]
pub fn student_results(students: &[Student]) -> InlineKeyboardMarkup {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = students
        .iter()
        .map(|student| {
            let school = student.school.as_deref().unwrap_or("");
            let label = truncate_str(format!("{} - {school}", student.name), BUTTON_LABEL_MAX);
            vec![InlineKeyboardButton::callback(
                label,
                format!("select_student_{}", student.examno),
            )]
        })
        .collect();

    rows.push(vec![InlineKeyboardButton::callback(
        "🔙 بحث جديد",
        "search_name",
    )]);
    rows.push(vec![InlineKeyboardButton::callback(
        "🏠 القائمة الرئيسية",
        "main_menu",
    )]);

    InlineKeyboardMarkup::new(rows)
}

/// Actions under a rendered result card
#[must_use]
pub fn result_actions(examno: &str) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![
            InlineKeyboardButton::callback("📤 مشاركة النتيجة", format!("share_{examno}")),
            InlineKeyboardButton::callback("🔍 بحث آخر", "main_menu"),
        ],
        vec![InlineKeyboardButton::callback(
            "🏠 القائمة الرئيسية",
            "main_menu",
        )],
    ])
}

/// Single back-to-main button
#[must_use]
pub fn back_to_main() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
        "🏠 القائمة الرئيسية",
        "main_menu",
    )]])
}

/// Subscribe link plus a re-check button
#[must_use]
pub fn subscription(channel: &str) -> InlineKeyboardMarkup {
    let username = channel.trim_start_matches('@');
    let mut rows = Vec::new();
    if let Ok(url) = reqwest::Url::parse(&format!("https://t.me/{username}")) {
        rows.push(vec![InlineKeyboardButton::url(
            format!("📢 اشترك في {channel}"),
            url,
        )]);
    }
    rows.push(vec![InlineKeyboardButton::callback(
        "✅ تحقق من الاشتراك",
        "check_subscription",
    )]);
    InlineKeyboardMarkup::new(rows)
}

/// Retry/back pair shown with the system-error template
#[must_use]
pub fn error_retry() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback("🔄 إعادة المحاولة", "main_menu"),
        InlineKeyboardButton::callback("🏠 القائمة الرئيسية", "main_menu"),
    ]])
}
