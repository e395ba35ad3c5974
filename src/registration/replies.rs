//! Reply texts sent back to the user.
//!
//! Trigger keywords quoted in the texts must stay in sync with
//! [`super::trigger`].

pub const NAME_PROMPT: &str = "請輸入您的姓名\n若要取消註冊，請輸入「取消」";

pub const NAME_PROMPT_AGAIN: &str = "請重新輸入您的姓名\n若要取消註冊，請輸入「取消」";

pub const NAME_FORMAT_ERROR: &str =
    "姓名格式不正確。\n- 只能包含中文和英文字母\n- 請重新輸入姓名\n- 若要取消註冊，請輸入「取消」";

pub const PHONE_FORMAT_ERROR: &str = "電話號碼格式不正確。\n- 需要是7-10位數字\n- 請重新輸入電話號碼\n- 若要重新輸入姓名，請輸入「重新輸入」\n- 若要取消註冊，請輸入「取消」";

pub const PHONE_TAKEN: &str = "此電話號碼已被註冊。\n- 請使用其他號碼\n- 若要重新輸入姓名，請輸入「重新輸入」\n- 若要取消註冊，請輸入「取消」";

pub const ALREADY_REGISTERED: &str = "您已經註冊過帳號";

pub const CANCELLED: &str = "已取消註冊流程。若要重新開始，請輸入「註冊」";

pub const REGISTRATION_FAILED: &str = "註冊過程發生錯誤，請稍後再試\n- 若要重新開始註冊，請輸入「註冊」\n- 若需要協助，請輸入「客服」";

pub const HELP: &str = "請輸入「註冊」來註冊新帳號，或輸入「客服」尋求協助。";

pub const CUSTOMER_SERVICE: &str = "如需客服協助，請直接在此留言描述您的問題。\n若要註冊新帳號，請輸入「註冊」";

/// Sent when handling fails in a way the dialogue cannot describe.
pub const INTERNAL_ERROR: &str = "系統發生錯誤，請稍後再試";

/// Asks for the phone number, echoing the name that was recorded.
pub fn phone_prompt(name: &str) -> String {
    format!(
        "已記錄姓名：{name}\n請輸入您的電話號碼\n- 若要重新輸入姓名，請輸入「重新輸入」\n- 若要取消註冊，請輸入「取消」"
    )
}

pub fn registration_complete(name: &str, phone: &str) -> String {
    format!("註冊成功！\n姓名：{name}\n電話：{phone}")
}
