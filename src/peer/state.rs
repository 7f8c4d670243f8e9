use crate::error::NegotiationError;

/// Состояние согласования одного peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Created,
    LocalDescriptionSet,
    GatheringCandidates,
    GatheringComplete,
    RemoteDescriptionPending,
    RemoteDescriptionSet,
    CandidatesApplied,
    Connected,
    Failed,
    Closed,
}

/// Типизированные входы машины состояний.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationEvent {
    LocalDescriptionSet,
    GatheringStarted,
    GatheringComplete,
    RemoteDescriptionReceived,
    RemoteDescriptionApplied,
    CandidatesApplied,
    TransportConnected,
    TransportFailed,
    Closed,
}

impl NegotiationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, NegotiationState::Failed | NegotiationState::Closed)
    }

    /// Следующее состояние или ошибка перехода.
    ///
    /// Offerer проходит цепочку в порядке объявления. Answerer сначала
    /// применяет удалённую сторону (`Created -> RemoteDescriptionPending`) и
    /// начинает своё описание с `CandidatesApplied`; соединяется из
    /// `GatheringComplete`.
    pub fn on_event(self, event: NegotiationEvent) -> Result<Self, NegotiationError> {
        use NegotiationEvent as E;
        use NegotiationState as S;

        let next = match (self, event) {
            (S::Closed, _) => None,
            (_, E::Closed) => Some(S::Closed),
            (S::Failed, _) => None,
            (_, E::TransportFailed) => Some(S::Failed),

            (S::Created | S::CandidatesApplied, E::LocalDescriptionSet) => {
                Some(S::LocalDescriptionSet)
            }
            (S::LocalDescriptionSet, E::GatheringStarted) => Some(S::GatheringCandidates),
            (S::GatheringCandidates, E::GatheringComplete) => Some(S::GatheringComplete),
            (S::Created | S::GatheringComplete, E::RemoteDescriptionReceived) => {
                Some(S::RemoteDescriptionPending)
            }
            (S::RemoteDescriptionPending, E::RemoteDescriptionApplied) => {
                Some(S::RemoteDescriptionSet)
            }
            (S::RemoteDescriptionSet, E::CandidatesApplied) => Some(S::CandidatesApplied),
            (S::CandidatesApplied | S::GatheringComplete, E::TransportConnected) => {
                Some(S::Connected)
            }
            (S::Connected, E::TransportConnected) => Some(S::Connected),
            _ => None,
        };

        next.ok_or(NegotiationError::InvalidTransition { from: self, event })
    }
}

#[cfg(test)]
mod tests {
    use super::NegotiationEvent as E;
    use super::NegotiationState as S;
    use super::*;

    fn walk(start: S, events: &[E]) -> Result<S, NegotiationError> {
        events.iter().try_fold(start, |s, e| s.on_event(*e))
    }

    #[test]
    fn offerer_chain_reaches_connected() {
        let end = walk(
            S::Created,
            &[
                E::LocalDescriptionSet,
                E::GatheringStarted,
                E::GatheringComplete,
                E::RemoteDescriptionReceived,
                E::RemoteDescriptionApplied,
                E::CandidatesApplied,
                E::TransportConnected,
            ],
        )
        .unwrap();
        assert_eq!(end, S::Connected);
    }

    #[test]
    fn answerer_chain_reaches_connected() {
        let end = walk(
            S::Created,
            &[
                E::RemoteDescriptionReceived,
                E::RemoteDescriptionApplied,
                E::CandidatesApplied,
                E::LocalDescriptionSet,
                E::GatheringStarted,
                E::GatheringComplete,
                E::TransportConnected,
            ],
        )
        .unwrap();
        assert_eq!(end, S::Connected);
    }

    #[test]
    fn candidates_cannot_precede_remote_description() {
        let err = S::Created.on_event(E::CandidatesApplied).unwrap_err();
        assert!(matches!(err, NegotiationError::InvalidTransition { .. }));
        assert!(S::GatheringCandidates.on_event(E::TransportConnected).is_err());
    }

    #[test]
    fn failure_and_close_are_reachable_and_terminal() {
        assert_eq!(S::GatheringCandidates.on_event(E::TransportFailed).unwrap(), S::Failed);
        assert_eq!(S::Failed.on_event(E::Closed).unwrap(), S::Closed);
        assert!(S::Closed.on_event(E::TransportConnected).is_err());
        assert!(S::Closed.on_event(E::Closed).is_err());
        assert!(S::Failed.on_event(E::LocalDescriptionSet).is_err());
        assert!(S::Failed.is_terminal() && S::Closed.is_terminal());
    }
}
