pub mod consent_ledger;
pub mod invitations;
pub mod membership;
pub mod notification;
pub mod studies;

use std::sync::Arc;

use crate::config::Config;
use crate::repository::Repository;

use consent_ledger::{ConsentLedger, ConsentPolicy};
use invitations::InvitationService;
use membership::MembershipService;
use notification::NotificationService;
use studies::StudyService;

pub struct AppState {
    pub config: Config,
    pub repo: Arc<dyn Repository>,
    pub notifications: Arc<NotificationService>,
    pub ledger: Arc<ConsentLedger>,
    pub membership: Arc<MembershipService>,
    pub invitations: Arc<InvitationService>,
    pub studies: Arc<StudyService>,
}

impl AppState {
    pub fn new(repo: Arc<dyn Repository>, config: Config) -> Self {
        let notifications = Arc::new(NotificationService::new());
        let ledger = Arc::new(ConsentLedger::new(
            repo.clone(),
            ConsentPolicy::from_config(&config),
            notifications.clone(),
        ));
        let membership = Arc::new(MembershipService::new(repo.clone(), ledger.clone()));
        let invitations = Arc::new(InvitationService::new(repo.clone(), notifications.clone()));
        let studies = Arc::new(StudyService::new(repo.clone(), ledger.clone()));

        Self {
            config,
            repo,
            notifications,
            ledger,
            membership,
            invitations,
            studies,
        }
    }
}
