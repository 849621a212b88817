//! Instructions sent to the vision model.
//!
//! Kept in one place so the wording can change without touching the
//! recognition or retry code, and so tests can inspect it directly.
//! Callers can override it via [`crate::config::DrainConfig::instruction`].

/// Default instruction sent alongside every posting image.
///
/// The postings are Korean. The instruction asks the model to return only the
/// body of the job posting verbatim, leaving out the summary fields (role,
/// employment type, work arrangement) that the record already stores.
pub const DEFAULT_INSTRUCTION: &str = "주어진 이미지는 한 기업의 채용 공고를 캡쳐한 이미지입니다. \
해당 이미지를 보고 채용공고에 해당하는 내용만을 정리해서 반환해주세요. \
내용은 반드시 자체적으로 변형하지 않고 원본 내용을 그대로 반환하되, \
사진 내부에서 채용 정보(직군, 고용형태, 근무 방식 등)에 대한 내용은 제외하고, \
오로지 공고 본문에 해당하는 내용만 반환해주세요.";

/// MIME type of the payload produced by the transformer; the provider
/// turns it into the `data:image/png;base64,...` URI of the request.
pub const IMAGE_MIME: &str = "image/png";
