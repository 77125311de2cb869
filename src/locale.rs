use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::choice::Aspect;

/// Language of every user-facing string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    Ja,
    En,
}

impl FromStr for Locale {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ja" | "ja-jp" | "japanese" => Ok(Locale::Ja),
            "en" | "en-us" | "en-gb" | "english" => Ok(Locale::En),
            other => Err(format!("unsupported locale `{other}`")),
        }
    }
}

/// Short, generic strings shown to the user. Diagnostics never go here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Catalog {
    locale: Locale,
}

impl Catalog {
    pub fn new(locale: Locale) -> Self {
        Self { locale }
    }

    pub fn locale(&self) -> Locale {
        self.locale
    }

    pub fn choice_title(&self) -> &'static str {
        match self.locale {
            Locale::Ja => "修正する項目を選択してください",
            Locale::En => "Select the item to correct",
        }
    }

    pub fn choice_alt_text(&self) -> &'static str {
        match self.locale {
            Locale::Ja => "解析結果",
            Locale::En => "Extracted receipt data",
        }
    }

    pub fn choice_hint(&self) -> &'static str {
        match self.locale {
            Locale::Ja => "間違えている部分を押してください",
            Locale::En => "Tap anything that is wrong",
        }
    }

    pub fn confirm_prompt(&self) -> &'static str {
        match self.locale {
            Locale::Ja => "登録しますか？",
            Locale::En => "Submit this receipt?",
        }
    }

    pub fn confirm_label(&self) -> &'static str {
        match self.locale {
            Locale::Ja => "金額を登録する",
            Locale::En => "Submit",
        }
    }

    pub fn confirm_alt_text(&self) -> &'static str {
        match self.locale {
            Locale::Ja => "登録確認",
            Locale::En => "Confirm submission",
        }
    }

    pub fn absent_value(&self) -> &'static str {
        "N/A"
    }

    /// Echo shown in the chat when an entry is tapped.
    pub fn selected(&self, field: &str, aspect: Aspect) -> String {
        match (self.locale, aspect) {
            (Locale::Ja, Aspect::Name) => format!("{field}の名前を選択しました"),
            (Locale::Ja, Aspect::Value) => format!("{field}の値を選択しました"),
            (Locale::En, Aspect::Name) => format!("Selected the name of {field}"),
            (Locale::En, Aspect::Value) => format!("Selected the value of {field}"),
        }
    }

    pub fn prompt_for(&self, field: &str, aspect: Aspect) -> String {
        match (self.locale, aspect) {
            (Locale::Ja, Aspect::Name) => format!("{field}の新しい名前を入力してください。"),
            (Locale::Ja, Aspect::Value) => format!("{field}の新しい値を入力してください。"),
            (Locale::En, Aspect::Name) => format!("Enter a new name for {field}."),
            (Locale::En, Aspect::Value) => format!("Enter a new value for {field}."),
        }
    }

    pub fn updated(&self, field: &str, aspect: Aspect, text: &str) -> String {
        match (self.locale, aspect) {
            (Locale::Ja, Aspect::Name) => format!("{field}の名前を '{text}' に更新しました。"),
            (Locale::Ja, Aspect::Value) => format!("{field}の値を '{text}' に更新しました。"),
            (Locale::En, Aspect::Name) => format!("Renamed {field} to '{text}'."),
            (Locale::En, Aspect::Value) => format!("Updated {field} to '{text}'."),
        }
    }

    pub fn submit_ack(&self) -> &'static str {
        match self.locale {
            Locale::Ja => "データ送信を開始しました。完了通知をお待ちください。",
            Locale::En => "Submitting your data. You will be notified when it is done.",
        }
    }

    pub fn submit_succeeded(&self) -> &'static str {
        match self.locale {
            Locale::Ja => "データが正常に送信されました！",
            Locale::En => "Your data was submitted successfully!",
        }
    }

    pub fn submit_failed(&self) -> &'static str {
        match self.locale {
            Locale::Ja => "エラー: データ送信に失敗しました。",
            Locale::En => "Error: submitting your data failed.",
        }
    }

    pub fn submit_error(&self) -> &'static str {
        match self.locale {
            Locale::Ja => "エラー: データ送信中に問題が発生しました。",
            Locale::En => "Error: something went wrong while submitting your data.",
        }
    }

    pub fn analysis_failed(&self) -> &'static str {
        match self.locale {
            Locale::Ja => "エラー: 画像の解析に失敗しました。",
            Locale::En => "Error: the image could not be analysed.",
        }
    }

    pub fn image_first(&self) -> &'static str {
        match self.locale {
            Locale::Ja => "エラー: 画像を送信してから修正操作をしてください。",
            Locale::En => "Error: please send a receipt image first.",
        }
    }

    pub fn invalid_selection(&self) -> &'static str {
        match self.locale {
            Locale::Ja => "エラー: 選択された項目が見つかりません。",
            Locale::En => "Error: that item is no longer available.",
        }
    }

    pub fn nothing_pending(&self) -> &'static str {
        match self.locale {
            Locale::Ja => "エラー: 修正する項目を先に選択してください。",
            Locale::En => "Error: pick an item to correct first.",
        }
    }

    pub fn blank_correction(&self) -> &'static str {
        match self.locale {
            Locale::Ja => "エラー: 空の値は登録できません。もう一度入力してください。",
            Locale::En => "Error: the new text is empty, please try again.",
        }
    }

    pub fn name_in_use(&self, name: &str) -> String {
        match self.locale {
            Locale::Ja => format!("エラー: '{name}' は既に使われている名前です。"),
            Locale::En => format!("Error: the name '{name}' is already in use."),
        }
    }

    pub fn name_too_long(&self) -> &'static str {
        match self.locale {
            Locale::Ja => "エラー: 項目名が長すぎます。短い名前を入力してください。",
            Locale::En => "Error: that name is too long. Please enter a shorter one.",
        }
    }

    pub fn nothing_to_submit(&self) -> &'static str {
        match self.locale {
            Locale::Ja => "エラー: 登録するデータがありません。",
            Locale::En => "Error: there is no data to submit.",
        }
    }

    pub fn generic_error(&self) -> &'static str {
        match self.locale {
            Locale::Ja => "エラー: 処理中に問題が発生しました。",
            Locale::En => "Error: something went wrong.",
        }
    }

    pub fn unsupported_message(&self) -> &'static str {
        match self.locale {
            Locale::Ja => "レシートの画像を送信してください。",
            Locale::En => "Please send a photo of your receipt.",
        }
    }
}
