/// The kind of a dependency edge between two source files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyKind {
    /// A plain import/require edge.
    Regular,
    /// The importing file also declares a jest mock for the target
    /// (`jest.mock` / `jest.doMock` / `jest.setMock`). Recorded in the graph
    /// but excluded when selecting tests affected by a change to the target.
    Mocked,
}
