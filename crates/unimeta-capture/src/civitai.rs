//! Civitai-compatible sampler naming.
//!
//! Maps raw sampler tokens plus a scheduler to the display names the Civitai
//! catalog understands (`dpmpp_2m` + `karras` → `DPM++ 2M Karras`). Tokens
//! with no mapping fall back to `<sampler>_<scheduler>` with the `normal`
//! scheduler suppressed.

/// Appends ` Karras` when the scheduler asks for it.
fn with_karras(sampler: &str, scheduler: Option<&str>) -> String {
    match scheduler {
        Some("karras") => format!("{sampler} Karras"),
        _ => sampler.to_string(),
    }
}

/// Appends ` Karras` or ` Exponential` when the scheduler asks for it.
fn with_karras_exponential(sampler: &str, scheduler: Option<&str>) -> String {
    match scheduler {
        Some("karras") => format!("{sampler} Karras"),
        Some("exponential") => format!("{sampler} Exponential"),
        _ => sampler.to_string(),
    }
}

/// The Civitai display name for a sampler/scheduler pair.
pub fn sampler_for_civitai(sampler: Option<&str>, scheduler: Option<&str>) -> String {
    let scheduler_lower = scheduler.map(str::to_ascii_lowercase);
    let scheduler = scheduler_lower.as_deref();
    let Some(sampler) = sampler.filter(|s| !s.trim().is_empty()) else {
        return scheduler.unwrap_or_default().to_string();
    };

    match sampler.to_ascii_lowercase().as_str() {
        "euler" | "euler_cfg_pp" => "Euler".to_string(),
        "euler_ancestral" | "euler_ancestral_cfg_pp" => "Euler a".to_string(),
        "heun" | "heunpp2" => "Heun".to_string(),
        "dpm_2" => with_karras("DPM2", scheduler),
        "dpm_2_ancestral" => with_karras("DPM2 a", scheduler),
        "lms" => with_karras("LMS", scheduler),
        "dpm_fast" => "DPM fast".to_string(),
        "dpm_adaptive" => "DPM adaptive".to_string(),
        "dpmpp_2s_ancestral" => with_karras("DPM++ 2S a", scheduler),
        "dpmpp_sde" | "dpmpp_sde_gpu" => with_karras("DPM++ SDE", scheduler),
        "dpmpp_2m" => with_karras("DPM++ 2M", scheduler),
        "dpmpp_2m_sde" | "dpmpp_2m_sde_gpu" => with_karras("DPM++ 2M SDE", scheduler),
        "dpmpp_3m_sde" | "dpmpp_3m_sde_gpu" => with_karras_exponential("DPM++ 3M SDE", scheduler),
        "lcm" => "LCM".to_string(),
        "ddim" => "DDIM".to_string(),
        "plms" => "PLMS".to_string(),
        "uni_pc" | "uni_pc_bh2" => "UniPC".to_string(),
        _ => match scheduler {
            None | Some("normal") => sampler.to_string(),
            Some(scheduler) => format!("{sampler}_{scheduler}"),
        },
    }
}

/// Display normalization for the plain (non-Civitai) sampler value:
/// `euler_karras` becomes `Euler Karras`; other `*_karras` tokens keep their
/// head verbatim with ` Karras` split out.
pub fn format_sampler_display(raw: &str) -> String {
    let lower = raw.to_ascii_lowercase();
    if lower == "euler_karras" {
        return "Euler Karras".to_string();
    }
    if lower.ends_with("_karras") {
        let head = &raw[..raw.len() - "_karras".len()];
        return format!("{head} Karras");
    }
    raw.to_string()
}
