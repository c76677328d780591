//! Arabic message templates and result formatting
//!
//! All user-visible text lives here. Replies go out in HTML parse mode, so
//! anything user- or database-sourced is escaped before interpolation.

use html_escape::encode_text;

use crate::broadcast::BroadcastResult;
use crate::config::TOKEN_CAPACITY_PER_SECOND;
use crate::directory::{ExamResult, Student};
use crate::dispatch::ManagerStats;
use crate::lookup::ResultPayload;

const UNAVAILABLE: &str = "غير متوفر";

/// Welcome text shown with the main menu
pub const WELCOME: &str = "أهلاً بك في بوت نتائج الطلبة! 📊\nاختر طريقة البحث:";

/// Prompt to pick a governorate before a name search
pub const GOVERNORATE_PROMPT: &str = "🏛️ اختر المحافظة أولاً لتقليل النتائج المكررة:";

/// Prompt for the exam number
pub const EXAMNO_PROMPT: &str = "أدخل الرقم الامتحاني (15 رقم):\nمثال: 272591110430082";

/// Rejection for a malformed exam number
pub const INVALID_EXAMNO: &str =
    "❌ رقم امتحاني غير صحيح\nيجب أن يكون الرقم 15 رقماً فقط\nمثال: 272591110430082";

/// Rejection for a malformed name
pub const INVALID_NAME: &str = "❌ اسم غير صحيح\nيرجى إدخال اسم صحيح باللغة العربية";

/// Rejection for input the spam heuristic caught
pub const INVALID_INPUT: &str = "❌ مدخل غير صحيح";

/// Generic no-results message
pub const NO_RESULTS: &str = "❌ لم يتم العثور على نتائج\nتأكد من صحة البيانات المدخلة";

/// No student record behind a selected exam number
pub const NO_STUDENT_DATA: &str = "❌ لم يتم العثور على بيانات الطالب";

/// Throttle message
pub const RATE_LIMIT_EXCEEDED: &str =
    "⏰ تم تجاوز الحد المسموح\nيرجى الانتظار قبل إجراء بحث جديد\nالحد المسموح: 3 طلبات في الدقيقة";

/// Catch-all failure message
pub const SYSTEM_ERROR: &str = "❌ حدث خطأ في النظام\nيرجى المحاولة مرة أخرى لاحقاً";

/// A governorate was expected but the session lost it
pub const SESSION_EXPIRED: &str = "❌ انتهت جلسة البحث. يرجى البدء من جديد";

/// Unknown inline button
pub const UNKNOWN_OPTION: &str = "خيار غير صحيح";

/// Non-admin tried an admin command
pub const ADMIN_ONLY: &str = "⛔️ هذا الأمر متاح للمشرفين فقط";

/// Ask the admin for the broadcast body
pub const BROADCAST_PROMPT: &str =
    "📣 أرسل نص الإعلان الذي تريد بثه لجميع المستخدمين\nللإلغاء أرسل: إلغاء";

/// Broadcast flow aborted
pub const BROADCAST_CANCELLED: &str = "✅ تم إلغاء الإعلان";

/// Confirm/cancel reminder when the reply is neither
pub const BROADCAST_REPROMPT: &str = "يرجى الرد بـ تأكيد أو إلغاء";

/// Token that aborts the broadcast flow
pub const CANCEL_TOKEN: &str = "إلغاء";

/// Token that launches the broadcast
pub const CONFIRM_TOKEN: &str = "تأكيد";

/// Subscription success
pub const SUBSCRIPTION_SUCCESS: &str =
    "✅ شكراً لك! تم التحقق من اشتراكك بنجاح\nيمكنك الآن استخدام جميع خدمات البوت 🎉";

/// Subscription still missing after a re-check
pub const SUBSCRIPTION_FAILED: &str =
    "❌ لم يتم العثور على اشتراكك في القناة\nيرجى التأكد من الاشتراك في القناة أولاً ثم المحاولة مرة أخرى";

/// Gate text asking the user to join the required channel
#[must_use]
pub fn subscription_required(channel: &str) -> String {
    format!(
        "🔒 عذراً، يجب الاشتراك في القناة التالية لاستخدام البوت:\n\n🆔 {}\n\n💡 بعد الاشتراك، اضغط على 'تحقق من الاشتراك'",
        encode_text(channel)
    )
}

/// Governorate picked, ask for the name
#[must_use]
pub fn governorate_chosen(governorate: &str) -> String {
    format!(
        "🏛️ تم اختيار محافظة: {}\n\n✍️ الآن أدخل الاسم الذي تريد البحث عنه:",
        encode_text(governorate)
    )
}

/// No matches for a name in a governorate
#[must_use]
pub fn no_name_matches(name: &str, governorate: &str) -> String {
    format!(
        "❌ لم يتم العثور على طلاب بالاسم '{}' في محافظة {}",
        encode_text(name),
        encode_text(governorate)
    )
}

/// Header plus numbered list for a multi-match page
#[must_use]
pub fn name_search_listing(
    name: &str,
    governorate: &str,
    students: &[Student],
    total_count: usize,
    has_more: bool,
) -> String {
    let mut text = format!(
        "🔍 نتائج البحث عن '{}' في {}:\n\n",
        encode_text(name),
        encode_text(governorate)
    );

    for (i, student) in students.iter().enumerate() {
        text.push_str(&format!("{}. {}\n", i + 1, encode_text(&student.name)));
        text.push_str(&format!(
            "   📚 المدرسة: {}\n",
            encode_text(student.school.as_deref().unwrap_or(UNAVAILABLE))
        ));
        text.push_str(&format!("   🆔 رقم الجلوس: {}\n\n", encode_text(&student.examno)));
    }

    if has_more {
        text.push_str(&format!("📝 يوجد المزيد من النتائج ({total_count} إجمالي)"));
    }

    text.trim_end().to_string()
}

fn gender_label(code: Option<&str>) -> String {
    match code {
        Some("M" | "1") => "ذكر".to_string(),
        Some("F" | "2") => "أنثى".to_string(),
        Some(other) => encode_text(other).to_string(),
        None => UNAVAILABLE.to_string(),
    }
}

/// Full result card from directory data.
///
/// A `None` result renders the same card with a "no result available" line
/// instead of grades — never a bare error.
#[must_use]
pub fn format_exam_result(student: &Student, result: Option<&ExamResult>) -> String {
    let mut text = format!(
        "👤 الاسم: {}\n🆔 الرقم الامتحاني: {}\n🏫 المدرسة: {}\n🏛️ المحافظة: {}\n👨‍🎓 الجنس: {}",
        encode_text(&student.name),
        encode_text(&student.examno),
        encode_text(student.school.as_deref().unwrap_or(UNAVAILABLE)),
        encode_text(student.governorate.as_deref().unwrap_or(UNAVAILABLE)),
        gender_label(student.gender.as_deref()),
    );

    match result {
        Some(result) => {
            if !result.subjects.is_empty() {
                text.push_str("\n\n📚 الدرجات:");
                for subject in &result.subjects {
                    text.push_str(&format!(
                        "\n• {}: {}",
                        encode_text(&subject.name),
                        encode_text(&subject.score)
                    ));
                }
            }
            if let Some(grade) = &result.final_grade {
                text.push_str(&format!("\n\n📈 الدرجة النهائية: {}", encode_text(grade)));
            }
            if let Some(rate) = &result.final_rate {
                text.push_str(&format!("\n٪ المعدل النهائي: {}", encode_text(rate)));
            }
            text.push_str(&format!(
                "\n📋 الحالة: {}",
                encode_text(result.status.as_deref().unwrap_or(UNAVAILABLE))
            ));
        }
        None => text.push_str("\n\n❌ لا توجد نتائج متوفرة لهذا الطالب"),
    }

    text
}

fn value_text(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => encode_text(s).to_string(),
        serde_json::Value::Null => UNAVAILABLE.to_string(),
        other => other.to_string(),
    }
}

fn or_unavailable(s: &str) -> String {
    if s.is_empty() {
        UNAVAILABLE.to_string()
    } else {
        encode_text(s).to_string()
    }
}

/// Full result card from the external service payload
#[must_use]
pub fn format_api_result(payload: &ResultPayload) -> String {
    let subjects: Vec<String> = payload
        .subjects
        .iter()
        .map(|(name, score)| format!("• {}: {}", encode_text(name), value_text(score)))
        .collect();

    format!(
        "👤 الاسم: {}\n🆔 الرقم الامتحاني: {}\n🏫 المدرسة: {}\n🏛️ المحافظة: {}\n👨‍🎓 الجنس: {}\n\n📚 الدرجات:\n{}\n\n📈 المجموع: {}\n٪ المعدل: {}\n📋 الحالة: {}",
        or_unavailable(&payload.name),
        or_unavailable(&payload.examno),
        or_unavailable(&payload.school),
        or_unavailable(&payload.governorate),
        or_unavailable(&payload.gender),
        subjects.join("\n"),
        value_text(&payload.total),
        value_text(&payload.average),
        or_unavailable(&payload.status),
    )
}

/// Share-with-friends text for a fetched result
#[must_use]
pub fn share_message(student_name: &str, examno: &str) -> String {
    format!(
        "🎉 تهانينا {}!\n🆔 رقم الامتحان: {}\n\n📊 تم الحصول على النتيجة عبر بوت نتائج الطلبة",
        encode_text(student_name),
        encode_text(examno)
    )
}

/// Confirmation prompt echoing the broadcast body
#[must_use]
pub fn broadcast_confirm(message: &str) -> String {
    format!(
        "📣 سيتم إرسال الإعلان التالي لجميع المستخدمين:\n\n{}\n\nللتأكيد أرسل: {CONFIRM_TOKEN}\nللإلغاء أرسل: {CANCEL_TOKEN}",
        encode_text(message)
    )
}

/// Post-broadcast receipt with the partial-failure tally
#[must_use]
pub fn broadcast_receipt(result: &BroadcastResult) -> String {
    format!(
        "📣 اكتمل البث\n✅ تم الإرسال: {}\n❌ فشل: {}\n⏱️ المدة: {:.1} ثانية",
        result.sent,
        result.failed,
        result.duration.as_secs_f64()
    )
}

/// Admin stats card
#[must_use]
pub fn stats_text(stats: &ManagerStats) -> String {
    format!(
        "🤖 وضع التشغيل: {:?}\n🔑 عدد التوكنات: {}\n📥 توكنات الاستقبال: {}\n⚡ السعة: {} رسالة/ثانية (الحد {} لكل توكن)",
        stats.mode,
        stats.total_credentials,
        stats.ingress_credentials,
        stats.capacity_per_second,
        TOKEN_CAPACITY_PER_SECOND
    )
}
