/// Execute an aggregate command deterministically (no IO, no async).
///
/// The canonical event-sourced lifecycle in one step:
///
/// 1. Decide: `aggregate.handle(command)` returns events (pure, no mutation).
/// 2. Evolve: each event is folded into the aggregate via `apply`.
///
/// Mutates the aggregate in place and returns the decided events. Useful in
/// tests and inline processing; the full pipeline (persistence, outbox,
/// publication) lives in the repository and use-case layers.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: flowra_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
