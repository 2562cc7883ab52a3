//! Pure string templating for outbound notifications.
//!
//! Formatting is pure arithmetic plus `format!` today and cannot fail, but the contract returns a
//! `String` unconditionally (never a `Result`): callers must never let a render failure abort a
//! whole dispatcher pass.

use crate::numeral::format_korean_count;

pub fn approaching(display_name: &str, milestone: u64, current_subs: u64) -> String {
    let remaining = milestone.saturating_sub(current_subs);
    format!(
        "📈 {display_name} 채널이 구독자 {}명에 다가가고 있어요! (남은 구독자: {}명)",
        format_korean_count(milestone),
        format_korean_count(remaining),
    )
}

pub fn achieved(display_name: &str, milestone: u64) -> String {
    format!(
        "🎉 {display_name} 채널이 구독자 {}명을 달성했습니다!",
        format_korean_count(milestone),
    )
}
