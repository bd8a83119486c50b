//! User-facing reply texts. Internal error detail never appears here.

use crate::analysis::TaskAnalysis;

pub const HELP: &str = "🤖 可用功能說明：

📝 表單相關：
• /填表 - 開始填寫表單
• 「我要填表單」- 自然語言方式

🎨 圖片生成：
• /畫圖 [描述] - 生成圖片
• 「幫我畫一張...」- 自然語言方式

📊 RSS 分析：
• /分析RSS [網址] - 分析RSS訂閱源
• 「分析這個RSS」- 自然語言方式

📈 狀態查詢：
• /查詢狀態 - 查看任務進度
• /取消任務 - 取消進行中的任務

👤 帳號：
• /註冊 [姓名] [Email] - 註冊使用者

💡 您也可以直接用自然語言描述需求，我會盡力理解並協助您！";

pub const GREETING: &str = "您好！我是您的助理，請問今天需要什麼協助？輸入 /說明 查看可用功能。";
pub const ANALYZING: &str = "🤔 正在分析您的需求，請稍候...";
pub const IMAGE_STARTED: &str = "好的，您的圖片正在生成中，預計將透過 Email 傳送給您。";
pub const IMAGE_USAGE: &str = "請提供繪圖提示詞，例如：/畫圖 一隻飛翔的龍";
pub const RSS_USAGE: &str = "請提供 RSS 網址，例如：/分析RSS https://example.com/rss";
pub const RSS_ASK_URL: &str = "請提供要分析的 RSS 網址，或使用指令：/分析RSS [網址]";
pub const STATUS_QUERY: &str = "正在查詢您的任務狀態...";
pub const CANCELLED: &str = "已取消目前的任務與對話狀態。";
pub const TASK_CONFIRMED: &str = "任務已確認，正在處理中...";
pub const TASK_CANCELLED: &str = "任務已取消";
pub const NOTHING_PENDING: &str = "目前沒有待確認的任務。";
pub const REGISTER_USAGE: &str = "請使用：/註冊 [姓名] [Email]，例如：/註冊 王小明 ming@example.com";
pub const REGISTRATION_PROMPT: &str =
    "您尚未註冊，請先使用 /註冊 [姓名] [Email] 完成註冊後再使用此功能。";
pub const FALLBACK_APOLOGY: &str = "抱歉，我暫時無法理解您的需求。請使用 /說明 查看可用功能。";
pub const PROCESSING_ERROR: &str = "處理您的請求時發生錯誤，請稍後再試。";
pub const EMPTY_MESSAGE: &str = "請輸入訊息內容，或輸入 /說明 查看可用功能。";

pub fn unknown_command(command: &str) -> String {
    format!("未知指令：{command}\n\n請輸入 /說明 查看可用功能")
}

pub fn form_link(link: &str) -> String {
    format!("📝 請點選以下連結填寫表單：\n{link}")
}

pub fn rss_started(url: &str) -> String {
    format!("正在分析 RSS: {url}")
}

pub fn processing(description: &str) -> String {
    format!("正在處理您的需求：{description}")
}

pub fn registered(name: &str) -> String {
    format!("✅ 註冊成功，{name}！現在可以使用所有功能。")
}

pub fn registration_failed() -> String {
    "註冊失敗，請確認資料後再試。".to_string()
}

pub fn health(ok: bool, users: usize, backups: usize) -> String {
    let verdict = if ok { "✅ 系統正常" } else { "⚠️ 系統異常" };
    format!("{verdict}\n使用者數：{users}\n備份數：{backups}")
}

pub fn postback_ack(data: &str) -> String {
    format!("您選擇了: {data}")
}

fn confidence_badge(confidence: f64) -> &'static str {
    if confidence < 0.5 {
        "🔴"
    } else if confidence < 0.8 {
        "🟡"
    } else {
        "🟢"
    }
}

/// Confirmation prompt for an analysis awaiting the user's go-ahead.
pub fn confirmation(analysis: &TaskAnalysis) -> String {
    format!(
        "{badge} 我理解您想要：{desc}\n\n⏱️ 預估處理時間：{time}\n📊 信心度：{pct:.0}%\n\n是否確認執行此任務？\n• ✅ 確認執行\n• ❌ 取消任務",
        badge = confidence_badge(analysis.confidence),
        desc = analysis.task_description,
        time = analysis.estimated_time,
        pct = analysis.confidence * 100.0,
    )
}

/// Explanation for a request that cannot be automated, with alternatives when known.
pub fn unable(analysis: &TaskAnalysis) -> String {
    let mut text = String::from("抱歉，我無法自動處理這個需求。");
    if let Some(reason) = analysis.reason.as_deref().filter(|r| !r.is_empty()) {
        text.push_str(&format!("\n原因：{reason}"));
    }
    if !analysis.alternatives.is_empty() {
        text.push_str("\n\n您可以嘗試：");
        for alt in &analysis.alternatives {
            text.push_str(&format!("\n• {alt}"));
        }
    }
    text.push_str("\n\n請使用 /說明 查看可用功能。");
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn badges_follow_confidence_bands() {
        assert_eq!(confidence_badge(0.3), "🔴");
        assert_eq!(confidence_badge(0.6), "🟡");
        assert_eq!(confidence_badge(0.8), "🟢");
    }
}
