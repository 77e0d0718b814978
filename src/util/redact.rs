/// ログ出力用に宛先アドレスを伏せ字化する。
pub(crate) fn redact(input: &str) -> String {
    let visible: String = input.chars().take(4).collect();
    if input.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("{visible}***")
    }
}
