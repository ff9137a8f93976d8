//! GLM-family `max_tokens` clamp: models served by Zhipu's GLM family reject
//! `max_tokens` above 8192 with an upstream "1210" error, so the clamp is
//! applied unconditionally rather than surfacing that error to the client.

const GLM_MARKERS: [&str; 3] = ["glm", "zhipu", "bigmodel"];
const GLM_MAX_TOKENS: u64 = 8192;

pub fn is_glm_model(model: &str) -> bool {
    let lower = model.to_ascii_lowercase();
    GLM_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Clamps `value` to `GLM_MAX_TOKENS` in place when `model` is GLM-family.
/// No-op for every other model and for values already within range.
pub fn clamp_max_tokens(model: &str, value: u64) -> u64 {
    if is_glm_model(model) {
        value.min(GLM_MAX_TOKENS)
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_glm_family_case_insensitively() {
        assert!(is_glm_model("GLM-4.6"));
        assert!(is_glm_model("zhipu-turbo"));
        assert!(is_glm_model("BigModel-Pro"));
        assert!(!is_glm_model("qwen3-coder-plus"));
    }

    #[test]
    fn clamps_only_glm_models_above_the_ceiling() {
        assert_eq!(clamp_max_tokens("glm-4.6", 32000), 8192);
        assert_eq!(clamp_max_tokens("glm-4.6", 4096), 4096);
        assert_eq!(clamp_max_tokens("gpt-4o", 32000), 32000);
    }
}
