//! Header-only model probe through llama.cpp's own loader.
//!
//! Used when the in-process GGUF reader gives up on a file (newer format revisions,
//! split archives). The model is opened with `vocab_only` so no tensors are mapped.

use halo_abi::metadata::DEFAULT_CONTEXT_SIZE;

/// Metadata key holding the trained context length for `arch`.
pub(crate) fn context_length_key(arch: &str) -> String {
    format!("{arch}.context_length")
}

/// First usable context size: the declared key, then the loader's own value, then the default.
pub(crate) fn pick_context_size(declared: Option<&str>, n_ctx_train: u32) -> u32 {
    declared
        .and_then(|s| s.trim().parse::<u64>().ok())
        .filter(|&v| v > 0)
        .map(|v| u32::try_from(v).unwrap_or(u32::MAX))
        .or((n_ctx_train > 0).then_some(n_ctx_train))
        .unwrap_or(DEFAULT_CONTEXT_SIZE)
}

#[cfg(feature = "llama-cpp")]
pub(crate) fn read_header(path: &std::path::Path) -> Result<halo_abi::ModelMetadata, halo_abi::RuntimeError> {
    use halo_abi::{ModelMetadata, RuntimeModel};

    use crate::ffi;
    use crate::model::LlamaModel;

    let model = LlamaModel::open(path, ffi::header_params())?;

    let architecture = model.meta_str("general.architecture").unwrap_or_default();
    let declared = if architecture.is_empty() {
        None
    } else {
        model.meta_str(&context_length_key(&architecture))
    };
    let context_size = pick_context_size(declared.as_deref(), model.n_ctx_train());
    let chat_template = model.chat_template().unwrap_or_default();

    tracing::debug!(
        path = %path.display(),
        %architecture,
        context_size,
        has_template = !chat_template.is_empty(),
        "header probe via llama.cpp"
    );

    Ok(ModelMetadata {
        context_size,
        chat_template,
        architecture,
        valid: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_architecture_scoped() {
        assert_eq!(context_length_key("llama"), "llama.context_length");
        assert_eq!(context_length_key("qwen2"), "qwen2.context_length");
    }

    #[test]
    fn declared_value_wins() {
        assert_eq!(pick_context_size(Some("32768"), 4096), 32768);
        assert_eq!(pick_context_size(Some(" 8192 "), 0), 8192);
    }

    #[test]
    fn falls_back_to_trained_then_default() {
        assert_eq!(pick_context_size(None, 2048), 2048);
        assert_eq!(pick_context_size(Some("nope"), 2048), 2048);
        assert_eq!(pick_context_size(Some("0"), 0), DEFAULT_CONTEXT_SIZE);
        assert_eq!(pick_context_size(None, 0), DEFAULT_CONTEXT_SIZE);
    }

    #[test]
    fn oversized_values_saturate() {
        assert_eq!(pick_context_size(Some("99999999999"), 0), u32::MAX);
    }
}
