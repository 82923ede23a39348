use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use log::{debug, warn};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{AppError, Result};
use crate::markdown;
use crate::models::{AcademicQualification, Opportunity, Volunteer};

const DEFAULT_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// System instruction for the conversational assistant, condensed from the
/// association's assistant persona.
pub const ASSISTANT_INSTRUCTION: &str = "أنت المساعد الذكي لجمعية \"طَوع\" التطوعية في \
المملكة العربية السعودية. ساعد المستخدمين في إيجاد الفرص التطوعية المناسبة، وأجب عن \
أسئلتهم وشجعهم على العطاء. أجب دائماً بالعربية الفصحى الواضحة، وإذا سُئلت عن مصدر \
المعلومات فأجب: \"المصدر: فريق طَوع.\"";

/// Seam over the generative-text collaborator so commands and tests can
/// swap the real client for a scripted one.
#[async_trait]
pub trait TextModel: Send + Sync {
    /// Single request/response completion. When `response_schema` is given
    /// the service must answer with JSON conforming to it.
    async fn complete(&self, prompt: &str, response_schema: Option<Value>) -> Result<String>;

    /// Streamed completion; chunks arrive in reply order and the full reply
    /// is their concatenation.
    async fn complete_streaming(
        &self,
        prompt: &str,
        system_instruction: &str,
    ) -> Result<BoxStream<'static, Result<String>>>;
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

impl GeminiConfig {
    /// Read the collaborator configuration from the environment.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| AppError::validation("GEMINI_API_KEY must be set"))?;
        let model = std::env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let base_url =
            std::env::var("GEMINI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Ok(GeminiConfig {
            api_key,
            model,
            base_url,
        })
    }
}

pub struct GeminiClient {
    http: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(GeminiClient { http, config })
    }

    fn endpoint(&self, action: &str) -> String {
        format!(
            "{}/models/{}:{action}",
            self.config.base_url, self.config.model
        )
    }

    fn request_body(
        prompt: &str,
        response_schema: Option<Value>,
        system_instruction: Option<&str>,
    ) -> Value {
        let mut body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
        });
        if let Some(schema) = response_schema {
            body["generationConfig"] = json!({
                "responseMimeType": "application/json",
                "responseSchema": schema,
            });
        }
        if let Some(instruction) = system_instruction {
            body["systemInstruction"] = json!({ "parts": [{ "text": instruction }] });
        }
        body
    }
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

impl GenerateResponse {
    fn text(self) -> String {
        self.candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .map(|p| p.text)
            .collect()
    }
}

/// Decode one SSE `data:` payload into its text chunk, if it carries one.
fn parse_sse_data(data: &str) -> Result<Option<String>> {
    let response: GenerateResponse = serde_json::from_str(data)
        .map_err(|e| AppError::external(format!("malformed stream chunk: {e}")))?;
    let text = response.text();
    if text.is_empty() {
        Ok(None)
    } else {
        Ok(Some(text))
    }
}

#[async_trait]
impl TextModel for GeminiClient {
    async fn complete(&self, prompt: &str, response_schema: Option<Value>) -> Result<String> {
        let body = Self::request_body(prompt, response_schema, None);
        let response = self
            .http
            .post(self.endpoint("generateContent"))
            .query(&[("key", self.config.api_key.as_str())])
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::external(format!(
                "completion request failed with status {status}"
            )));
        }

        let parsed: GenerateResponse = response.json().await?;
        let text = parsed.text();
        debug!("completion returned {} chars", text.len());
        if text.is_empty() {
            return Err(AppError::external("completion response carried no text"));
        }
        Ok(text)
    }

    async fn complete_streaming(
        &self,
        prompt: &str,
        system_instruction: &str,
    ) -> Result<BoxStream<'static, Result<String>>> {
        let body = Self::request_body(prompt, None, Some(system_instruction));
        let response = self
            .http
            .post(self.endpoint("streamGenerateContent"))
            .query(&[
                ("key", self.config.api_key.as_str()),
                ("alt", "sse"),
            ])
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::external(format!(
                "streaming request failed with status {status}"
            )));
        }

        Ok(sse_chunk_stream(response.bytes_stream()))
    }
}

/// Decode an SSE byte stream into its text chunks. Raw bytes are buffered
/// and only whole lines decoded, so a multi-byte character split across
/// network chunks stays intact; bytes left over when the source ends
/// without a trailing newline are drained as one final line.
fn sse_chunk_stream<S, E>(source: S) -> BoxStream<'static, Result<String>>
where
    S: futures::Stream<Item = std::result::Result<bytes::Bytes, E>> + Send + 'static,
    E: Into<AppError> + Send + 'static,
{
    futures::stream::unfold(
        (Box::pin(source), Vec::<u8>::new(), false),
        |(mut bytes, mut buffer, mut ended)| async move {
            loop {
                if let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                    let line_bytes: Vec<u8> = buffer.drain(..=newline).collect();
                    let line = String::from_utf8_lossy(&line_bytes);
                    let Some(data) = line.trim().strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();
                    if data.is_empty() || data == "[DONE]" {
                        continue;
                    }
                    match parse_sse_data(data) {
                        Ok(Some(text)) => return Some((Ok(text), (bytes, buffer, ended))),
                        Ok(None) => continue,
                        Err(error) => return Some((Err(error), (bytes, buffer, ended))),
                    }
                }

                if ended {
                    return None;
                }
                match bytes.next().await {
                    Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                    Some(Err(error)) => {
                        return Some((Err(error.into()), (bytes, buffer, ended)))
                    }
                    None => {
                        ended = true;
                        if buffer.is_empty() {
                            return None;
                        }
                        buffer.push(b'\n');
                    }
                }
            }
        },
    )
    .boxed()
}

/// Ask the collaborator for the ids of the best-matching opportunities.
/// Any answer that is not a JSON array of known numeric ids is a failure.
pub async fn recommend_opportunities(
    model: &dyn TextModel,
    user_input: &str,
    opportunities: &[Opportunity],
) -> Result<Vec<u64>> {
    let simplified: Vec<Value> = opportunities
        .iter()
        .map(|o| {
            json!({
                "id": o.id,
                "title": o.title,
                "summary": o.summary,
                "category": o.category.label(),
                "skills": o.skill_tags,
                "role": o.volunteer_role,
                "workStyle": o.work_style.label(),
            })
        })
        .collect();

    let prompt = format!(
        "أنت خبير في مطابقة المتطوعين مع الفرص المناسبة في جمعية \"طوع\" التطوعية \
         السعودية. بناءً على وصف المستخدم التالي: \"{user_input}\"، أي من الفرص التالية \
         هي الأنسب؟\n\nالفرص المتاحة:\n{}\n\nيرجى إعادة مصفوفة JSON تحتوي فقط على \
         أرقام \"id\" لأفضل 3 فرص موصى بها، مرتبة من الأكثر ملاءمة إلى الأقل. \
         مثال على الاستجابة: [2, 5, 1]",
        serde_json::to_string(&simplified)?
    );

    let schema = json!({ "type": "ARRAY", "items": { "type": "NUMBER" } });
    let text = model.complete(&prompt, Some(schema)).await?;

    let ids: Vec<u64> = serde_json::from_str(text.trim())
        .map_err(|e| AppError::external(format!("recommendation response is not an id array: {e}")))?;

    let known: HashSet<u64> = opportunities.iter().map(|o| o.id).collect();
    if let Some(unknown) = ids.iter().find(|id| !known.contains(id)) {
        return Err(AppError::external(format!(
            "recommendation referenced unknown opportunity id {unknown}"
        )));
    }
    Ok(ids)
}

/// Profile fields the extractor may fill. Everything is optional; blank
/// strings and empty arrays are treated as absent on merge.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfileDraft {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub short_bio: Option<String>,
    pub academic_qualification: Option<String>,
    pub specialization: Option<String>,
    pub university: Option<String>,
    pub graduation_year: Option<String>,
    pub current_job_title: Option<String>,
    pub skills: Option<Vec<String>>,
    pub portfolio_link: Option<String>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Map a free-form qualification string onto the closed enum.
fn map_qualification(raw: &str) -> Option<AcademicQualification> {
    let lowered = raw.to_lowercase();
    if lowered.contains("bachelor") || lowered.contains("بكالوريوس") {
        Some(AcademicQualification::Bachelor)
    } else if lowered.contains("master") || lowered.contains("ماجستير") {
        Some(AcademicQualification::Master)
    } else if lowered.contains("phd") || lowered.contains("دكتوراه") {
        Some(AcademicQualification::Phd)
    } else if lowered.contains("diploma") || lowered.contains("دبلوم") {
        Some(AcademicQualification::Diploma)
    } else if lowered.contains("high school") || lowered.contains("ثانوية") {
        Some(AcademicQualification::HighSchool)
    } else if lowered.contains("student") || lowered.contains("طالب") {
        Some(AcademicQualification::Student)
    } else {
        None
    }
}

impl ProfileDraft {
    /// Merge the present, non-empty fields into an existing profile without
    /// clobbering anything the extractor left blank.
    pub fn apply(&self, volunteer: &mut Volunteer) {
        if let Some(value) = present(&self.full_name) {
            volunteer.full_name = value.to_string();
        }
        if let Some(value) = present(&self.email) {
            volunteer.email = value.to_string();
        }
        if let Some(value) = present(&self.phone) {
            volunteer.phone = value.to_string();
        }
        if let Some(value) = present(&self.city) {
            volunteer.city = value.to_string();
        }
        if let Some(value) = present(&self.country) {
            volunteer.country = value.to_string();
        }
        if let Some(value) = present(&self.short_bio) {
            volunteer.short_bio = value.to_string();
        }
        if let Some(qualification) = present(&self.academic_qualification).and_then(map_qualification)
        {
            volunteer.academic_qualification = qualification;
        }
        if let Some(value) = present(&self.specialization) {
            volunteer.specialization = value.to_string();
        }
        if let Some(value) = present(&self.university) {
            volunteer.university = Some(value.to_string());
        }
        if let Some(value) = present(&self.graduation_year) {
            volunteer.graduation_year = value.to_string();
        }
        if let Some(value) = present(&self.current_job_title) {
            volunteer.current_job_title = Some(value.to_string());
        }
        if let Some(skills) = self.skills.as_ref().filter(|s| !s.is_empty()) {
            volunteer.skills = skills.clone();
        }
        if let Some(value) = present(&self.portfolio_link) {
            volunteer.portfolio_link = Some(value.to_string());
        }
    }
}

/// Pull the JSON payload out of a model reply that may wrap it in a
/// ```json fence or surround it with prose.
fn json_payload(text: &str) -> Result<String> {
    let trimmed = text.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Ok(trimmed.to_string());
    }

    for block in markdown::parse(trimmed) {
        if let markdown::Block::Code(code) = block {
            let code = code.strip_prefix("json").unwrap_or(&code).trim();
            if !code.is_empty() {
                return Ok(code.to_string());
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if end > start {
            return Ok(trimmed[start..=end].to_string());
        }
    }

    Err(AppError::external("response did not contain a JSON payload"))
}

/// Extract profile fields from free text (a pasted CV or public profile).
pub async fn extract_profile(model: &dyn TextModel, source_text: &str) -> Result<ProfileDraft> {
    let prompt = format!(
        "أنت مساعد توظيف خبير متخصص في تحليل السير الذاتية للمتطوعين في المملكة \
         العربية السعودية. مهمتك استخراج المعلومات الأساسية من النص التالي \
         وتنسيقها في كائن JSON يلتزم بالمخطط المحدد بدقة. لا تخترع أي معلومات؛ \
         اترك الحقل فارغاً إذا لم تجد قيمته.\n\nالنص:\n---\n{source_text}\n---"
    );

    let string_field = |description: &str| json!({ "type": "STRING", "description": description });
    let schema = json!({
        "type": "OBJECT",
        "properties": {
            "fullName": string_field("الاسم الكامل للشخص."),
            "email": string_field("عنوان البريد الإلكتروني."),
            "phone": string_field("رقم الهاتف."),
            "city": string_field("المدينة."),
            "country": string_field("الدولة."),
            "shortBio": string_field("نبذة قصيرة أو ملخص شخصي."),
            "academicQualification": string_field("المؤهل العلمي."),
            "specialization": string_field("التخصص الدراسي."),
            "university": string_field("اسم الجامعة."),
            "graduationYear": string_field("سنة التخرج."),
            "currentJobTitle": string_field("المسمى الوظيفي الحالي."),
            "skills": { "type": "ARRAY", "items": { "type": "STRING" },
                        "description": "قائمة بالمهارات التقنية والشخصية." },
            "portfolioLink": string_field("رابط معرض الأعمال إن وجد."),
        },
    });

    let text = model.complete(&prompt, Some(schema)).await?;
    let payload = json_payload(&text)?;
    let draft: ProfileDraft = serde_json::from_str(&payload)
        .map_err(|e| AppError::external(format!("extraction response is not a profile object: {e}")))?;
    Ok(draft)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Model,
}

#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub text: String,
}

/// One conversation with the assistant. The caller drains each reply stream
/// to completion before sending again, which keeps at most one call in
/// flight per session.
#[derive(Debug, Default)]
pub struct ChatSession {
    history: Vec<ChatTurn>,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    fn prompt_for(&self, message: &str) -> String {
        let mut prompt = String::new();
        for turn in &self.history {
            let speaker = match turn.role {
                ChatRole::User => "المستخدم",
                ChatRole::Model => "المساعد",
            };
            prompt.push_str(speaker);
            prompt.push_str(": ");
            prompt.push_str(&turn.text);
            prompt.push('\n');
        }
        prompt.push_str("المستخدم: ");
        prompt.push_str(message);
        prompt
    }

    /// Send a message and hand back the reply chunk stream. Record the
    /// exchange with [`ChatSession::record_exchange`] once the stream is
    /// drained; a stream that fails mid-reply leaves the transcript as it
    /// was, so the next prompt never carries an unanswered question.
    pub async fn send(
        &self,
        model: &dyn TextModel,
        message: &str,
    ) -> Result<BoxStream<'static, Result<String>>> {
        let prompt = self.prompt_for(message);
        model.complete_streaming(&prompt, ASSISTANT_INSTRUCTION).await
    }

    pub fn record_exchange(&mut self, message: &str, reply: &str) {
        if reply.is_empty() {
            warn!("assistant reply stream ended empty");
        }
        self.history.push(ChatTurn {
            role: ChatRole::User,
            text: message.to_string(),
        });
        self.history.push(ChatTurn {
            role: ChatRole::Model,
            text: reply.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::{sample_opportunity, sample_volunteer};

    /// Scripted collaborator: fixed reply for `complete`, fixed chunk
    /// sequence for streaming, optionally failing after the last chunk.
    struct ScriptedModel {
        reply: String,
        chunks: Vec<String>,
        fail_mid_stream: bool,
    }

    impl ScriptedModel {
        fn replying(reply: &str) -> Self {
            ScriptedModel {
                reply: reply.to_string(),
                chunks: Vec::new(),
                fail_mid_stream: false,
            }
        }
    }

    #[async_trait]
    impl TextModel for ScriptedModel {
        async fn complete(&self, _prompt: &str, _schema: Option<Value>) -> Result<String> {
            Ok(self.reply.clone())
        }

        async fn complete_streaming(
            &self,
            _prompt: &str,
            _system_instruction: &str,
        ) -> Result<BoxStream<'static, Result<String>>> {
            let mut chunks: Vec<Result<String>> = self.chunks.iter().cloned().map(Ok).collect();
            if self.fail_mid_stream {
                chunks.push(Err(AppError::external("connection dropped mid-reply")));
            }
            Ok(futures::stream::iter(chunks).boxed())
        }
    }

    fn opportunities() -> Vec<Opportunity> {
        vec![
            sample_opportunity(1, "تعليم الأطفال"),
            sample_opportunity(2, "بيئة"),
            sample_opportunity(5, "تطوير موقع"),
        ]
    }

    #[tokio::test]
    async fn recommendation_ids_parse() {
        let model = ScriptedModel::replying("[2, 5, 1]");
        let ids = recommend_opportunities(&model, "أحب البيئة", &opportunities())
            .await
            .unwrap();
        assert_eq!(ids, vec![2, 5, 1]);
    }

    #[tokio::test]
    async fn malformed_recommendation_is_an_external_error() {
        let model = ScriptedModel::replying("أنصحك بالفرصة الثانية");
        let result = recommend_opportunities(&model, "أي شيء", &opportunities()).await;
        assert!(matches!(result, Err(AppError::ExternalService(_))));
    }

    #[tokio::test]
    async fn unknown_recommended_id_is_an_external_error() {
        let model = ScriptedModel::replying("[2, 99]");
        let result = recommend_opportunities(&model, "أي شيء", &opportunities()).await;
        assert!(matches!(result, Err(AppError::ExternalService(_))));
    }

    #[tokio::test]
    async fn profile_extraction_accepts_fenced_json() {
        let model = ScriptedModel::replying(
            "إليك النتيجة:\n```json\n{\"fullName\": \"أحمد الرشيد\", \
             \"academicQualification\": \"بكالوريوس\", \"skills\": [\"Rust\"], \
             \"email\": \"\"}\n```",
        );
        let draft = extract_profile(&model, "نص السيرة").await.unwrap();
        assert_eq!(draft.full_name.as_deref(), Some("أحمد الرشيد"));

        let mut volunteer = sample_volunteer(1, "مجهول");
        let original_email = volunteer.email.clone();
        draft.apply(&mut volunteer);

        assert_eq!(volunteer.full_name, "أحمد الرشيد");
        assert_eq!(
            volunteer.academic_qualification,
            AcademicQualification::Bachelor
        );
        assert_eq!(volunteer.skills, vec!["Rust".to_string()]);
        // The blank email in the draft must not clobber the existing one.
        assert_eq!(volunteer.email, original_email);
    }

    #[tokio::test]
    async fn draft_merge_skips_empty_collections() {
        let mut volunteer = sample_volunteer(1, "سارة");
        volunteer.skills = vec!["تصميم".to_string()];

        let draft = ProfileDraft {
            skills: Some(Vec::new()),
            ..ProfileDraft::default()
        };
        draft.apply(&mut volunteer);
        assert_eq!(volunteer.skills, vec!["تصميم".to_string()]);
    }

    #[tokio::test]
    async fn chat_reply_is_ordered_chunk_concatenation() {
        let model = ScriptedModel {
            reply: String::new(),
            chunks: vec!["أهلاً ".to_string(), "وسهلاً ".to_string(), "بك".to_string()],
            fail_mid_stream: false,
        };

        let mut session = ChatSession::new();
        let mut stream = session.send(&model, "مرحبا").await.unwrap();
        let mut reply = String::new();
        while let Some(chunk) = stream.next().await {
            reply.push_str(&chunk.unwrap());
        }
        session.record_exchange("مرحبا", &reply);

        assert_eq!(reply, "أهلاً وسهلاً بك");
        assert_eq!(session.history.len(), 2);
        assert_eq!(session.history[0].text, "مرحبا");
        assert_eq!(session.history[1].text, reply);
    }

    #[tokio::test]
    async fn failed_reply_stream_leaves_no_unanswered_turn() {
        let model = ScriptedModel {
            reply: String::new(),
            chunks: vec!["بدأت ".to_string()],
            fail_mid_stream: true,
        };

        let mut session = ChatSession::new();
        let mut stream = session.send(&model, "سؤال").await.unwrap();
        let mut failed = false;
        while let Some(chunk) = stream.next().await {
            if chunk.is_err() {
                failed = true;
                break;
            }
        }
        assert!(failed);
        // The transcript stays empty, so a retry starts from a clean prompt.
        assert!(session.history.is_empty());

        session.record_exchange("سؤال", "جواب");
        assert_eq!(session.history.len(), 2);
    }

    #[tokio::test]
    async fn sse_bytes_without_trailing_newline_still_decode() {
        let payload: &[u8] =
            r#"data: {"candidates":[{"content":{"parts":[{"text":"خاتمة"}]}}]}"#.as_bytes();
        let source =
            futures::stream::iter(vec![Ok::<_, AppError>(bytes::Bytes::from_static(payload))]);

        let chunks: Vec<String> = sse_chunk_stream(source)
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;
        assert_eq!(chunks, vec!["خاتمة".to_string()]);
    }

    #[test]
    fn sse_data_lines_decode_to_chunks() {
        let data = r#"{"candidates":[{"content":{"parts":[{"text":"جزء"}]}}]}"#;
        assert_eq!(parse_sse_data(data).unwrap(), Some("جزء".to_string()));

        let empty = r#"{"candidates":[]}"#;
        assert_eq!(parse_sse_data(empty).unwrap(), None);

        assert!(matches!(
            parse_sse_data("not json"),
            Err(AppError::ExternalService(_))
        ));
    }

    #[test]
    fn json_payload_falls_back_to_braces() {
        let wrapped = "النتيجة النهائية {\"fullName\": \"منى\"} انتهى";
        assert_eq!(json_payload(wrapped).unwrap(), "{\"fullName\": \"منى\"}");
        assert!(json_payload("لا يوجد شيء").is_err());
    }

    #[test]
    fn qualification_mapping_covers_both_languages() {
        assert_eq!(
            map_qualification("حاصل على دكتوراه في الفيزياء"),
            Some(AcademicQualification::Phd)
        );
        assert_eq!(
            map_qualification("Master of Science"),
            Some(AcademicQualification::Master)
        );
        assert_eq!(map_qualification("غير معروف"), None);
    }
}
