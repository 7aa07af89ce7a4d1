/// Kind of structural change carried by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
	Add,
	Remove,
	/// In-place replacement; identity and position are unchanged.
	Set,
}
