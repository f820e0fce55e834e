//! Standard beans shipped with Kiln.

pub mod project;
pub mod quality;

pub use project::{Layout, LayoutStyle, ProjectKBean, Tests};
pub use quality::QualityKBean;

use crate::registry::{BeanCatalog, BeanOrigin};

impl BeanCatalog {
    /// The standard beans, with `project` as the default of last resort.
    pub fn standard() -> Self {
        Self::new()
            .with_fallback::<ProjectKBean>()
            .with::<QualityKBean>(BeanOrigin::Standard)
    }
}
