//! GPU capability registry.
//!
//! Enumerates the context's API version and extension strings once at
//! initialization and answers the questions the init path asks when
//! choosing between the 2.0-baseline, 3.0-recommended and 3.1/3.2 code
//! paths. The render loop itself never consults this.

use bitflags::bitflags;

use crate::gpu::GpuContext;

bitflags! {
    /// Core features grouped by the version band that introduces them,
    /// plus a few that only ever arrive via extensions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Features: u32 {
        /// Integer texture formats and integer samplers.
        const INTEGER_TEXTURES     = 1 << 0;
        /// Renderable half-float color attachments.
        const HALF_FLOAT_COLOR     = 1 << 1;
        /// Fence sync objects.
        const SYNC_OBJECTS         = 1 << 2;
        /// Instanced draw calls.
        const INSTANCED_RENDERING  = 1 << 3;
        /// Compute shader dispatch.
        const COMPUTE_SHADERS      = 1 << 4;
        /// Geometry shader stage.
        const GEOMETRY_SHADERS     = 1 << 5;
        /// Elapsed-time GPU queries.
        const TIMER_QUERIES        = 1 << 6;
        /// Platform-display binding extensions (surfaceless contexts etc.).
        const PLATFORM_DISPLAY     = 1 << 7;
    }
}

/// The version bands the engine distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ApiVersion {
    V2_0,
    V3_0,
    V3_1,
    V3_2,
}

impl ApiVersion {
    fn from_tuple(version: (u32, u32)) -> ApiVersion {
        match version {
            (0..=2, _) => ApiVersion::V2_0,
            (3, 0) => ApiVersion::V3_0,
            (3, 1) => ApiVersion::V3_1,
            _ => ApiVersion::V3_2,
        }
    }

    /// Core features guaranteed by this version band.
    fn core_features(self) -> Features {
        let mut f = Features::empty();
        if self >= ApiVersion::V3_0 {
            f |= Features::INTEGER_TEXTURES
                | Features::HALF_FLOAT_COLOR
                | Features::SYNC_OBJECTS
                | Features::INSTANCED_RENDERING;
        }
        if self >= ApiVersion::V3_1 {
            f |= Features::COMPUTE_SHADERS;
        }
        if self >= ApiVersion::V3_2 {
            f |= Features::GEOMETRY_SHADERS;
        }
        f
    }
}

impl std::fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ApiVersion::V2_0 => "2.0",
            ApiVersion::V3_0 => "3.0",
            ApiVersion::V3_1 => "3.1",
            ApiVersion::V3_2 => "3.2",
        };
        f.write_str(s)
    }
}

/// How much of the API the init path may rely on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// 2.0 features only.
    Baseline,
    /// The 3.0 path the engine is written against.
    Recommended,
    /// 3.1/3.2 extras available.
    Advanced,
}

/// Detected version, features and extension set of a context.
#[derive(Debug, Clone)]
pub struct CapabilityRegistry {
    version: ApiVersion,
    features: Features,
    extensions: Vec<String>,
}

impl CapabilityRegistry {
    /// Interrogate a live context.
    pub fn detect<G: GpuContext>(gl: &G) -> Self {
        Self::from_parts(gl.version(), gl.extensions())
    }

    /// Build from raw version/extension data (also the test seam).
    pub fn from_parts(version: (u32, u32), extensions: Vec<String>) -> Self {
        let version = ApiVersion::from_tuple(version);
        let mut features = version.core_features();

        for ext in &extensions {
            match ext.as_str() {
                "GL_EXT_disjoint_timer_query" | "GL_ARB_timer_query" => {
                    features |= Features::TIMER_QUERIES;
                }
                "GL_EXT_color_buffer_half_float" | "GL_EXT_color_buffer_float" => {
                    features |= Features::HALF_FLOAT_COLOR;
                }
                "GL_OES_surfaceless_context" | "EGL_KHR_platform_gbm" => {
                    features |= Features::PLATFORM_DISPLAY;
                }
                _ => {}
            }
        }

        log::debug!(
            "GPU capabilities: version {version}, {} extensions, features {features:?}",
            extensions.len()
        );

        Self {
            version,
            features,
            extensions,
        }
    }

    /// The highest version band the context satisfies.
    #[inline]
    pub fn best_available_version(&self) -> ApiVersion {
        self.version
    }

    #[inline]
    pub fn has_min_version(&self, version: ApiVersion) -> bool {
        self.version >= version
    }

    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.iter().any(|e| e == name)
    }

    #[inline]
    pub fn supports(&self, features: Features) -> bool {
        self.features.contains(features)
    }

    /// Which code path initialization should take.
    pub fn execution_mode(&self) -> ExecutionMode {
        if self.has_min_version(ApiVersion::V3_1) {
            ExecutionMode::Advanced
        } else if self.has_min_version(ApiVersion::V3_0) {
            ExecutionMode::Recommended
        } else {
            ExecutionMode::Baseline
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_bands_order() {
        assert!(ApiVersion::V2_0 < ApiVersion::V3_0);
        assert!(ApiVersion::V3_1 < ApiVersion::V3_2);
    }

    #[test]
    fn core_features_accumulate_per_band() {
        let caps20 = CapabilityRegistry::from_parts((2, 0), vec![]);
        assert!(!caps20.supports(Features::INTEGER_TEXTURES));

        let caps30 = CapabilityRegistry::from_parts((3, 0), vec![]);
        assert!(caps30.supports(Features::INTEGER_TEXTURES | Features::SYNC_OBJECTS));
        assert!(!caps30.supports(Features::COMPUTE_SHADERS));

        let caps31 = CapabilityRegistry::from_parts((3, 1), vec![]);
        assert!(caps31.supports(Features::COMPUTE_SHADERS));
        assert!(!caps31.supports(Features::GEOMETRY_SHADERS));

        let caps32 = CapabilityRegistry::from_parts((3, 2), vec![]);
        assert!(caps32.supports(Features::GEOMETRY_SHADERS));
    }

    #[test]
    fn timer_queries_come_from_extensions() {
        let without = CapabilityRegistry::from_parts((3, 2), vec![]);
        assert!(!without.supports(Features::TIMER_QUERIES));

        let with = CapabilityRegistry::from_parts(
            (2, 0),
            vec!["GL_EXT_disjoint_timer_query".to_string()],
        );
        assert!(with.supports(Features::TIMER_QUERIES));
        assert!(with.has_extension("GL_EXT_disjoint_timer_query"));
    }

    #[test]
    fn execution_mode_selection() {
        let baseline = CapabilityRegistry::from_parts((2, 0), vec![]);
        assert_eq!(baseline.execution_mode(), ExecutionMode::Baseline);
        assert_eq!(baseline.best_available_version(), ApiVersion::V2_0);

        let recommended = CapabilityRegistry::from_parts((3, 0), vec![]);
        assert_eq!(recommended.execution_mode(), ExecutionMode::Recommended);

        let advanced = CapabilityRegistry::from_parts((3, 2), vec![]);
        assert_eq!(advanced.execution_mode(), ExecutionMode::Advanced);
        assert!(advanced.has_min_version(ApiVersion::V3_0));
    }
}
