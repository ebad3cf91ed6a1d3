//! Safety interlock for spoken input
//!
//! Runs before any reasoning call. A keyword anywhere in the text stops the
//! robot, including inside longer phrases ("don't stop"). Common words that
//! merely contain a keyword are removed first.

use exhibit_core::Language;

/// Lower-case words that force an immediate stop
pub const SAFETY_KEYWORDS: &[&str] = &[
    "stop",
    "halt",
    "emergency",
    "freeze",
    "dừng",
    "ngừng",
    "khẩn cấp",
    "cứu",
];

/// Lower-case words containing a keyword without asking for help
///
/// "nghiên cứu" is research, "tra cứu" is looking something up.
pub const BENIGN_COMPOUNDS: &[&str] = &["nghiên cứu", "tra cứu"];

/// True when `text` contains any safety keyword
pub fn is_safety_stop(text: &str) -> bool {
    let mut lowered = text.to_lowercase();
    for compound in BENIGN_COMPOUNDS {
        lowered = lowered.replace(compound, " ");
    }
    SAFETY_KEYWORDS.iter().any(|keyword| lowered.contains(keyword))
}

/// Spoken confirmation after a safety stop
pub fn acknowledgement(lang: Language) -> &'static str {
    match lang {
        Language::Vietnamese => "Đã dừng robot khẩn cấp.",
        Language::English => "Emergency stop. The robot has stopped.",
    }
}

/// Spoken apology when the assistant cannot answer
pub fn apology(lang: Language) -> &'static str {
    match lang {
        Language::Vietnamese => "Xin lỗi, tôi gặp chút trục trặc khi suy nghĩ.",
        Language::English => "Sorry, I had a little trouble thinking.",
    }
}
