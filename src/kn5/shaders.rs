//! Default parameters of the simulator's stock shaders.

/// Stock configuration of one shader.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShaderDefaults {
    pub name: &'static str,
    pub properties: &'static [(&'static str, f32)],
    /// Whether materials set up for this shader start out alpha tested.
    pub alpha_tested: bool,
}

pub const FALLBACK_SHADER: &str = "ksPerPixel";

pub const SHADER_DEFAULTS: &[ShaderDefaults] = &[
    ShaderDefaults {
        name: "ksPerPixel",
        properties: &[("ksDiffuse", 0.4), ("ksAmbient", 0.4)],
        alpha_tested: false,
    },
    ShaderDefaults {
        name: "ksTree",
        properties: &[("ksDiffuse", 0.25), ("ksAmbient", 0.3), ("ksSpecular", 0.0)],
        alpha_tested: true,
    },
    ShaderDefaults {
        name: "ksGrass",
        properties: &[("ksDiffuse", 0.4), ("ksAmbient", 0.4)],
        alpha_tested: true,
    },
    ShaderDefaults {
        name: "ksPerPixelMultiMap",
        properties: &[
            ("ksDiffuse", 0.4),
            ("ksAmbient", 0.4),
            ("ksSpecular", 0.2),
            ("ksSpecularEXP", 50.0),
        ],
        alpha_tested: false,
    },
    ShaderDefaults {
        name: "ksMultilayer",
        properties: &[("ksDiffuse", 0.4), ("ksAmbient", 0.4)],
        alpha_tested: false,
    },
];

/// Defaults for `shader`, falling back to [`FALLBACK_SHADER`] for unknown
/// names.
pub fn shader_defaults(shader: &str) -> &'static ShaderDefaults {
    SHADER_DEFAULTS
        .iter()
        .find(|defaults| defaults.name == shader)
        .or_else(|| {
            SHADER_DEFAULTS
                .iter()
                .find(|defaults| defaults.name == FALLBACK_SHADER)
        })
        .unwrap_or(&SHADER_DEFAULTS[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_finds_known_shader() {
        let multimap = shader_defaults("ksPerPixelMultiMap");
        assert_eq!(multimap.properties.len(), 4);
        assert!(!multimap.alpha_tested);
        assert!(shader_defaults("ksTree").alpha_tested);
    }

    #[test]
    fn unknown_shader_falls_back_to_per_pixel() {
        assert_eq!(shader_defaults("ksMystery").name, FALLBACK_SHADER);
    }
}
