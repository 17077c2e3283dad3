//! Template rendering instrumentation, fed by a template engine's profiler
//! enter/leave hooks.

use std::{collections::HashMap, sync::Arc};

use serde_json::json;

use crate::{transaction::SegmentId, Inspector};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderScope {
    Root,
    Template,
    Block,
    Macro,
}

#[derive(Debug, Clone)]
pub struct RenderProfile {
    pub template: String,
    pub name: String,
    pub scope: RenderScope,
}

/// Opens a "view" segment per rendered template. Blocks and macros are too
/// fine-grained to trace individually; they stay inside their template's
/// segment.
pub struct TemplateTracer {
    inspector: Arc<Inspector>,
    segments: HashMap<String, SegmentId>,
}

impl TemplateTracer {
    pub fn new(inspector: Arc<Inspector>) -> Self {
        Self {
            inspector,
            segments: HashMap::new(),
        }
    }

    pub fn enter(&mut self, profile: &RenderProfile) {
        if !self.inspector.can_add_segments() {
            return;
        }
        if !matches!(profile.scope, RenderScope::Root | RenderScope::Template) {
            return;
        }

        let label = match profile.scope {
            RenderScope::Root => &profile.name,
            _ => &profile.template,
        };
        let id = self.inspector.start_segment("view", label);
        self.segments.insert(profile.template.clone(), id);
    }

    /// Ends the segment opened for this template; leaves without a matching
    /// enter (blocks, macros, disabled tracer) are ignored.
    pub fn leave(&mut self, profile: &RenderProfile) {
        let Some(id) = self.segments.remove(&profile.template) else {
            return;
        };

        self.inspector.add_segment_context(
            id,
            "Data",
            json!({
                "template": profile.template,
                "name": profile.name,
            }),
        );
        self.inspector.end_segment(id);
    }
}
