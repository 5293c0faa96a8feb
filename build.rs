fn main() {
    let mut target_soc: Option<String> = None;

    // Only the hook image cares which SoC was chosen; the library builds every
    // support package regardless, so host builds may pick any number.
    let building_image = std::env::var_os("CARGO_FEATURE_IMAGE").is_some();

    for (name, _) in std::env::vars() {
        let prefix = "CARGO_FEATURE_TARGET_SOC_";
        if let Some(suffix) = name.strip_prefix(prefix) {
            if let Some(previous) = &target_soc {
                if building_image {
                    panic!(
                        "multiple target SoC features defined (at least {} and {})",
                        show_feature(previous),
                        show_feature(suffix)
                    );
                }
                continue;
            }

            target_soc = Some(suffix.to_string());
        }
    }

    if building_image && target_soc.is_none() {
        panic!("missing target-soc-* feature");
    }

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=hook.ld");
}

fn show_feature(envvar: &str) -> String {
    let mut name = "target-soc-".to_string();
    name.push_str(&envvar.to_ascii_lowercase().replace('_', "-"));
    name
}
