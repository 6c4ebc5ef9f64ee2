//! Transform planner.
//!
//! Turns a [`TransformRequest`] plus the probed source size into the ordered
//! operation list an engine runs:
//!
//! 1. flatten and strip metadata
//! 2. drop alpha unless the output is a png without background
//! 3. set the background (explicit color, or transparent for png)
//! 4. geometry for the effective mode
//! 5. quality, for lossy output only

use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::engine::{Geometry, ImageEngine, Operation};
use crate::error::{ResizeError, Result};
use crate::probe::Dimensions;
use crate::request::{Gravity, Mode, OutputFormat, TransformRequest};

/// Fully specified engine invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformPlan {
    pub source: PathBuf,
    pub operations: Vec<Operation>,
    pub target: PathBuf,
    pub mode: Mode,
    pub format: OutputFormat,
}

impl TransformPlan {
    /// Plan writing into `target`.
    pub fn new(
        request: &TransformRequest,
        native: Option<Dimensions>,
        source: impl Into<PathBuf>,
        target: impl Into<PathBuf>,
    ) -> Self {
        let mode = request.effective_mode();
        if mode != request.mode() {
            debug!(
                requested = %request.mode(),
                width = ?request.width(),
                height = ?request.height(),
                "single bound given, resizing with fit"
            );
        }
        Self {
            source: source.into(),
            operations: operations(request, native),
            target: target.into(),
            mode,
            format: request.format(),
        }
    }

    /// Gravity the geometry steps anchor at, if any.
    pub fn gravity(&self) -> Option<Gravity> {
        self.operations.iter().find_map(|op| match op {
            Operation::Gravity(g) => Some(*g),
            _ => None,
        })
    }

    /// Run the plan, writing to `output` instead of the planned target.
    ///
    /// The store hands in a temp path here and renames it afterwards.
    pub fn execute_into(&self, engine: &dyn ImageEngine, output: &Path) -> Result<()> {
        let result = engine.convert(&self.source, &self.operations, output)?;
        if result.is_success() {
            return Ok(());
        }
        Err(ResizeError::TransformFailure {
            code: result.status,
            output: result.output,
            command: engine.describe(&self.source, &self.operations, output),
        })
    }

    pub fn execute(&self, engine: &dyn ImageEngine) -> Result<()> {
        self.execute_into(engine, &self.target)
    }
}

fn operations(request: &TransformRequest, native: Option<Dimensions>) -> Vec<Operation> {
    let png = request.format() == OutputFormat::Png;
    let background = request.background();

    let mut ops = vec![Operation::Flatten, Operation::Strip];

    if !png || background.is_some() {
        ops.push(Operation::AlphaRemove);
    }

    match background {
        Some(color) => ops.push(Operation::Background(color.to_string())),
        None if png => ops.push(Operation::Background("transparent".to_string())),
        None => {}
    }

    let (width, height) = (request.width(), request.height());
    match (request.effective_mode(), width, height) {
        (Mode::Exact, Some(w), Some(h)) => {
            ops.push(Operation::Gravity(Gravity::Center));
            ops.push(Operation::Resize(Geometry { width: Some(w), height: Some(h), fill: false }));
            ops.push(Operation::Extent { width: w, height: h });
        }
        (Mode::Crop, Some(w), Some(h)) => {
            ops.push(Operation::Gravity(crop_gravity(request.gravity(), native)));
            ops.push(Operation::Resize(Geometry { width: Some(w), height: Some(h), fill: true }));
            ops.push(Operation::Extent { width: w, height: h });
        }
        (_, None, None) => {}
        (_, w, h) => {
            ops.push(Operation::Resize(Geometry { width: w, height: h, fill: false }));
        }
    }

    if request.format().is_lossy() {
        ops.push(Operation::Quality(request.quality_percent()));
    }

    ops
}

/// Crop anchor: explicit override, else north for portrait sources, else center.
pub fn crop_gravity(explicit: Option<Gravity>, native: Option<Dimensions>) -> Gravity {
    match (explicit, native) {
        (Some(gravity), _) => gravity,
        (None, Some(dims)) if dims.is_portrait() => Gravity::North,
        _ => Gravity::Center,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineOutput;
    use crate::request::AttachmentId;
    use std::cell::RefCell;

    fn request(width: Option<u32>, height: Option<u32>, mode: Mode) -> TransformRequest {
        TransformRequest::new(AttachmentId::try_from(42_i64).unwrap())
            .with_size(width, height)
            .with_mode(mode)
    }

    fn plan(request: &TransformRequest, native: Option<Dimensions>) -> TransformPlan {
        TransformPlan::new(request, native, "/src/a.jpg", "/cache/out.jpg")
    }

    const PORTRAIT: Dimensions = Dimensions { width: 400, height: 800 };
    const LANDSCAPE: Dimensions = Dimensions { width: 800, height: 400 };

    #[test]
    fn test_exact_jpg() {
        let plan = plan(&request(Some(300), Some(200), Mode::Exact), None);
        assert_eq!(
            plan.operations,
            vec![
                Operation::Flatten,
                Operation::Strip,
                Operation::AlphaRemove,
                Operation::Gravity(Gravity::Center),
                Operation::Resize(Geometry { width: Some(300), height: Some(200), fill: false }),
                Operation::Extent { width: 300, height: 200 },
                Operation::Quality(80),
            ]
        );
    }

    #[test]
    fn test_png_without_background_keeps_alpha() {
        let req = request(Some(100), None, Mode::Fit).with_format(OutputFormat::Png);
        let plan = plan(&req, None);
        assert_eq!(
            plan.operations,
            vec![
                Operation::Flatten,
                Operation::Strip,
                Operation::Background("transparent".into()),
                Operation::Resize(Geometry { width: Some(100), height: None, fill: false }),
            ]
        );
    }

    #[test]
    fn test_png_with_background_removes_alpha() {
        let req = request(Some(100), Some(100), Mode::Exact)
            .with_format(OutputFormat::Png)
            .with_background(Some("#ffffff"))
            .unwrap();
        let plan = plan(&req, None);
        assert_eq!(&plan.operations[2..4], &[
            Operation::AlphaRemove,
            Operation::Background("#ffffff".into()),
        ]);
        assert!(!plan.operations.iter().any(|op| matches!(op, Operation::Quality(_))));
    }

    #[test]
    fn test_single_bound_crop_becomes_fit() {
        let plan = plan(&request(Some(300), None, Mode::Crop), Some(PORTRAIT));
        assert_eq!(plan.mode, Mode::Fit);
        assert_eq!(plan.gravity(), None);
        assert!(plan.operations.contains(&Operation::Resize(Geometry {
            width: Some(300),
            height: None,
            fill: false
        })));
    }

    #[test]
    fn test_height_only_bounds_by_height() {
        let plan = plan(&request(None, Some(120), Mode::Fit), None);
        assert!(plan.operations.contains(&Operation::Resize(Geometry {
            width: None,
            height: Some(120),
            fill: false
        })));
    }

    #[test]
    fn test_fit_both_bounds_no_extent() {
        let plan = plan(&request(Some(300), Some(200), Mode::Fit), None);
        assert!(!plan.operations.iter().any(|op| matches!(op, Operation::Extent { .. })));
    }

    #[test]
    fn test_crop_gravity_defaults() {
        let crop = request(Some(300), Some(300), Mode::Crop);
        assert_eq!(plan(&crop, Some(PORTRAIT)).gravity(), Some(Gravity::North));
        assert_eq!(plan(&crop, Some(LANDSCAPE)).gravity(), Some(Gravity::Center));
        assert_eq!(plan(&crop, None).gravity(), Some(Gravity::Center));

        let explicit = crop.clone().with_gravity(Some(Gravity::South));
        assert_eq!(plan(&explicit, Some(PORTRAIT)).gravity(), Some(Gravity::South));
    }

    #[test]
    fn test_crop_covers_then_extends() {
        let plan = plan(&request(Some(300), Some(200), Mode::Crop), Some(LANDSCAPE));
        let tail = &plan.operations[plan.operations.len() - 3..];
        assert_eq!(tail, &[
            Operation::Resize(Geometry { width: Some(300), height: Some(200), fill: true }),
            Operation::Extent { width: 300, height: 200 },
            Operation::Quality(80),
        ]);
    }

    struct FailingEngine {
        calls: RefCell<usize>,
    }

    impl ImageEngine for FailingEngine {
        fn identify(&self, _: &Path) -> Result<EngineOutput> {
            Ok(EngineOutput::failure("no"))
        }

        fn convert(&self, _: &Path, _: &[Operation], _: &Path) -> Result<EngineOutput> {
            *self.calls.borrow_mut() += 1;
            Ok(EngineOutput {
                status: Some(3),
                output: "convert: no decode delegate for this image format".into(),
            })
        }
    }

    #[test]
    fn test_failure_carries_code_output_and_command() {
        let engine = FailingEngine { calls: RefCell::new(0) };
        let plan = plan(&request(Some(10), Some(10), Mode::Exact), None);
        let err = plan.execute(&engine).unwrap_err();
        match err {
            ResizeError::TransformFailure { code, output, command } => {
                assert_eq!(code, Some(3));
                assert!(output.contains("no decode delegate"));
                assert!(command.contains("/src/a.jpg"));
                assert!(command.contains("-extent 10x10"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(*engine.calls.borrow(), 1);
    }

    #[test]
    fn test_failure_names_the_path_actually_written() {
        let engine = FailingEngine { calls: RefCell::new(0) };
        let plan = plan(&request(Some(10), Some(10), Mode::Exact), None);
        let err = plan
            .execute_into(&engine, Path::new("/cache/.tmp-abc123.jpg"))
            .unwrap_err();
        match err {
            ResizeError::TransformFailure { command, .. } => {
                assert!(command.ends_with("/cache/.tmp-abc123.jpg"), "got {command}");
                assert!(!command.contains("/cache/out.jpg"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
