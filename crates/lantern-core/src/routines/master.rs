//! The dispatching routine that selects a concrete routine on its first
//! input.

use std::sync::Arc;

use lantern_proto::wire::{self, InitiateMsg, RoutineName};

use crate::{
    client::Client,
    env::Environment,
    hub::Hub,
    routine::{InputKind, Routine, RoutineInput, RoutineOutput},
    routines::{ComeOnline, ConnectionRequest, FriendRejection, FriendRequest, error_output},
};

/// One master routine is instantiated per transaction, on the first frame.
///
/// On the first user message it validates the `initiate` property, builds
/// the matching sub-routine, and from then on delegates every input
/// unchanged - including that first one. It never processes any other input
/// itself; a mismatch produces a single terminating error output.
pub struct MasterRoutine {
    sub: Option<Box<dyn Routine>>,
    client: Arc<Client>,
    hub: Arc<Hub>,
    env: Arc<dyn Environment>,
}

impl MasterRoutine {
    /// Create the dispatcher for one transaction on `client`'s connection.
    #[must_use]
    pub fn new(client: Arc<Client>, hub: Arc<Hub>, env: Arc<dyn Environment>) -> Self {
        Self { sub: None, client, hub, env }
    }

    fn select_routine(&self, msg: &str) -> Result<Box<dyn Routine>, String> {
        let parsed: InitiateMsg = wire::parse_strict(msg).map_err(|e| e.to_string())?;

        let routine: Box<dyn Routine> = match parsed.initiate {
            RoutineName::ComeOnline => Box::new(ComeOnline::new(
                Arc::clone(&self.client),
                Arc::clone(&self.hub),
                Arc::clone(&self.env),
            )),
            RoutineName::SendConnectionRequest => {
                Box::new(ConnectionRequest::new(Arc::clone(&self.hub)))
            },
            RoutineName::SendFriendRequest => Box::new(FriendRequest::new(Arc::clone(&self.hub))),
            RoutineName::SendFriendRejection => {
                Box::new(FriendRejection::new(Arc::clone(&self.hub)))
            },
        };
        Ok(routine)
    }
}

impl Routine for MasterRoutine {
    fn next(&mut self, input: RoutineInput) -> Vec<RoutineOutput> {
        if self.sub.is_none() {
            if input.kind != InputKind::UserMsg {
                // A close (or a stray timeout) before any dispatch: there is
                // nothing to tear down and nobody to answer.
                return vec![];
            }
            match self.select_routine(&input.msg) {
                Ok(sub) => self.sub = Some(sub),
                Err(reason) => return vec![error_output(None, Some(&reason))],
            }
        }

        match self.sub.as_mut() {
            Some(sub) => sub.next(input),
            None => vec![],
        }
    }
}
