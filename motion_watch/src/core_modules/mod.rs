// The per-frame stages of the engine. Each stage is a pure function of its
// inputs except `capture_gate`, which remembers the last capture time.

pub mod annotator;
pub mod capture_gate;
pub mod frame;
pub mod motion_detector;
pub mod preprocessor;
