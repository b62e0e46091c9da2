//! Resolved frames → printable trace lines
//!
//! One line per call site, `at <name> (<source>:<line>:<column>)`. Inlined
//! callees are printed before the method they were inlined into. Anything
//! that can't be looked up prints as `?`; a frame is never dropped.

// String formatting intentionally uses format! for clarity
#![allow(clippy::format_push_string)]

use log::debug;
use serde::Serialize;

use crate::domain::{MethodId, SymbolError};
use crate::symbolization::NameCache;

/// Where a method offset lands in source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourcePosition {
    pub file: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

/// (methodId, offset) → source position and method names
pub trait DebugInfoExtractor {
    /// Display name of a method; `Some("")` for anonymous functions
    fn method_name(&self, method: MethodId) -> Option<String>;

    /// Source position of an offset inside a method
    ///
    /// # Errors
    /// Returns an error when the method or offset has no line information
    fn source_position(&self, method: MethodId, offset: u64)
        -> Result<SourcePosition, SymbolError>;

    /// Callees inlined at an offset, innermost first, without the method
    /// itself
    fn inlined_sites(&self, _method: MethodId, _offset: u64) -> Vec<FrameSite> {
        Vec::new()
    }
}

/// Maps positions in generated code back to the authored source
pub trait SourceMapTranslator {
    fn translate(&self, position: &SourcePosition) -> Option<SourcePosition>;
}

/// One call site inside a frame
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FrameSite {
    pub method: Option<MethodId>,
    pub offset: Option<u64>,
    /// Overrides the extractor's name when known up front
    pub name: Option<String>,
}

impl FrameSite {
    #[must_use]
    pub fn new(method: MethodId, offset: u64) -> Self {
        Self { method: Some(method), offset: Some(offset), name: None }
    }
}

/// Call sites of one physical frame, innermost (most deeply inlined) first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TraceFrame {
    pub sites: Vec<FrameSite>,
}

impl TraceFrame {
    #[must_use]
    pub fn single(site: FrameSite) -> Self {
        Self { sites: vec![site] }
    }

    /// A frame whose method could not be identified
    #[must_use]
    pub fn unresolved() -> Self {
        Self::single(FrameSite::default())
    }

    /// Prepend inlined callees; `chain` is innermost first
    #[must_use]
    pub fn with_inlined(mut self, chain: Vec<FrameSite>) -> Self {
        let mut sites = chain;
        sites.append(&mut self.sites);
        self.sites = sites;
        self
    }
}

pub struct TraceFormatter<'a> {
    extractor: &'a dyn DebugInfoExtractor,
    source_map: Option<&'a dyn SourceMapTranslator>,
    names: Option<&'a NameCache>,
}

impl<'a> TraceFormatter<'a> {
    #[must_use]
    pub fn new(extractor: &'a dyn DebugInfoExtractor) -> Self {
        Self { extractor, source_map: None, names: None }
    }

    #[must_use]
    pub fn with_source_map(mut self, source_map: &'a dyn SourceMapTranslator) -> Self {
        self.source_map = Some(source_map);
        self
    }

    #[must_use]
    pub fn with_name_cache(mut self, names: &'a NameCache) -> Self {
        self.names = Some(names);
        self
    }

    /// Every site of every frame, one line each, innermost frame first
    #[must_use]
    pub fn format_trace(&self, frames: &[TraceFrame]) -> String {
        let mut out = String::new();
        for frame in frames {
            for line in self.format_frame(frame) {
                out.push_str(&format!("{line}\n"));
            }
        }
        out
    }

    #[must_use]
    pub fn format_frame(&self, frame: &TraceFrame) -> Vec<String> {
        if frame.sites.is_empty() {
            return vec![self.format_site(&FrameSite::default())];
        }
        frame.sites.iter().map(|site| self.format_site(site)).collect()
    }

    /// Innermost site of the innermost frame only
    ///
    /// For hot paths that report where execution is, not how it got there.
    #[must_use]
    pub fn format_top_frame(&self, frames: &[TraceFrame]) -> Option<String> {
        let site = frames.first()?.sites.first().cloned().unwrap_or_default();
        Some(self.format_site(&site))
    }

    #[must_use]
    pub fn format_site(&self, site: &FrameSite) -> String {
        let name = match self.name_of(site) {
            Some(name) if name.is_empty() => "anonymous".to_string(),
            Some(name) => name,
            None => "?".to_string(),
        };
        let position = self.position_of(site);

        let file = position.file.as_deref().unwrap_or("?");
        let line = position.line.map_or_else(|| "?".to_string(), |l| l.to_string());
        let column = position.column.map_or_else(|| "?".to_string(), |c| c.to_string());
        format!("at {name} ({file}:{line}:{column})")
    }

    fn name_of(&self, site: &FrameSite) -> Option<String> {
        if site.name.is_some() {
            return site.name.clone();
        }
        let method = site.method?;
        match self.names {
            Some(cache) => cache.get_or_insert_with(method, || self.extractor.method_name(method)),
            None => self.extractor.method_name(method),
        }
    }

    fn position_of(&self, site: &FrameSite) -> SourcePosition {
        let (Some(method), Some(offset)) = (site.method, site.offset) else {
            return SourcePosition::default();
        };
        let position = match self.extractor.source_position(method, offset) {
            Ok(position) => position,
            Err(err) => {
                debug!("No source position for {method}+0x{offset:x}: {err}");
                return SourcePosition::default();
            }
        };
        self.source_map.and_then(|map| map.translate(&position)).unwrap_or(position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    impl DebugInfoExtractor for Fixed {
        fn method_name(&self, method: MethodId) -> Option<String> {
            match method.0 {
                1 => Some("main".to_string()),
                2 => Some(String::new()),
                _ => None,
            }
        }

        fn source_position(
            &self,
            method: MethodId,
            offset: u64,
        ) -> Result<SourcePosition, SymbolError> {
            if method.0 == 1 {
                let line = u32::try_from(offset).unwrap_or(0) + 10;
                Ok(SourcePosition { file: Some("app.ts".into()), line: Some(line), column: Some(5) })
            } else {
                Err(SymbolError::UnresolvedSymbol(offset))
            }
        }
    }

    struct ToOriginal;

    impl SourceMapTranslator for ToOriginal {
        fn translate(&self, position: &SourcePosition) -> Option<SourcePosition> {
            Some(SourcePosition {
                file: Some("app.ets".into()),
                line: position.line.map(|l| l - 9),
                column: position.column,
            })
        }
    }

    #[test]
    fn test_resolved_site() {
        let formatter = TraceFormatter::new(&Fixed);
        assert_eq!(formatter.format_site(&FrameSite::new(MethodId(1), 2)), "at main (app.ts:12:5)");
    }

    #[test]
    fn test_extractor_failure_yields_question_marks() {
        let formatter = TraceFormatter::new(&Fixed);
        assert_eq!(formatter.format_site(&FrameSite::new(MethodId(3), 0)), "at ? (?:?:?)");
        assert_eq!(formatter.format_site(&FrameSite::new(MethodId(2), 0)), "at anonymous (?:?:?)");
    }

    #[test]
    fn test_trace_keeps_unresolved_frames() {
        let formatter = TraceFormatter::new(&Fixed);
        let frames = vec![
            TraceFrame::single(FrameSite::new(MethodId(1), 0)),
            TraceFrame::unresolved(),
            TraceFrame::single(FrameSite::new(MethodId(1), 1)),
        ];
        let trace = formatter.format_trace(&frames);
        assert_eq!(trace.lines().count(), 3);
        assert_eq!(trace.lines().nth(1), Some("at ? (?:?:?)"));
    }

    #[test]
    fn test_inlined_chain_prints_innermost_first() {
        let formatter = TraceFormatter::new(&Fixed);
        let inlined = FrameSite { name: Some("helper".into()), ..FrameSite::default() };
        let frame = TraceFrame::single(FrameSite::new(MethodId(1), 0)).with_inlined(vec![inlined]);
        assert_eq!(
            formatter.format_frame(&frame),
            vec!["at helper (?:?:?)".to_string(), "at main (app.ts:10:5)".to_string()]
        );
    }

    #[test]
    fn test_source_map_applies_after_lookup() {
        let formatter = TraceFormatter::new(&Fixed).with_source_map(&ToOriginal);
        assert_eq!(formatter.format_site(&FrameSite::new(MethodId(1), 0)), "at main (app.ets:1:5)");
    }

    #[test]
    fn test_top_frame_fast_path() {
        let formatter = TraceFormatter::new(&Fixed);
        let frames = vec![
            TraceFrame::single(FrameSite::new(MethodId(1), 3)),
            TraceFrame::single(FrameSite::new(MethodId(3), 0)),
        ];
        assert_eq!(formatter.format_top_frame(&frames).as_deref(), Some("at main (app.ts:13:5)"));
        assert_eq!(formatter.format_top_frame(&[]), None);
    }

    #[test]
    fn test_names_go_through_cache() {
        let cache = NameCache::new(4);
        let formatter = TraceFormatter::new(&Fixed).with_name_cache(&cache);
        let _ = formatter.format_site(&FrameSite::new(MethodId(1), 0));
        assert_eq!(cache.get(MethodId(1)).as_deref(), Some("main"));
    }
}
