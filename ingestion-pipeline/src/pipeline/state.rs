use state_machines::state_machine;

state_machine! {
    name: ChunkMachine,
    state: ChunkState,
    initial: Pending,
    states: [Pending, Derived, Embedded, Resolved, Persisted, Recorded, Failed],
    events {
        derive { transition: { from: Pending, to: Derived } }
        embed { transition: { from: Derived, to: Embedded } }
        resolve { transition: { from: Embedded, to: Resolved } }
        persist { transition: { from: Resolved, to: Persisted } }
        record { transition: { from: Persisted, to: Recorded } }
        abort {
            transition: { from: Pending, to: Failed }
            transition: { from: Derived, to: Failed }
            transition: { from: Embedded, to: Failed }
            transition: { from: Resolved, to: Failed }
            transition: { from: Persisted, to: Failed }
        }
    }
}

pub fn pending() -> ChunkMachine<(), Pending> {
    ChunkMachine::new(())
}
