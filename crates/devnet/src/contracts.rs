//! State and rules of the ConsentManager, DataRegistry and KeyRecovery
//! contracts as hosted by the development ledger.
//!
//! Each method either returns its bincode-encoded output or reverts with one
//! of the reason strings in [`steward_core::revert`].

use std::collections::{HashMap, HashSet};
use steward_core::{
    encode_output, revert, Address, Approval, ConsentGrant, Contract, ContractAddresses,
    ContractCall, ContractQuery, DataRecord, Guardian, Hash, RecoveryPhase, RecoveryRequest,
    RecoveryStatus, SECONDS_PER_DAY,
};

/// Revert reason.
pub type Revert = &'static str;

/// Execution context of one transaction.
#[derive(Debug, Clone, Copy)]
pub struct Env {
    pub sender: Address,
    /// Sender's nonce for this transaction; feeds derived ids.
    pub nonce: u64,
    /// Timestamp of the including block.
    pub timestamp: u64,
}

/// Consent grants indexed by id and by subject.
#[derive(Debug, Default)]
pub struct ConsentManager {
    grants: HashMap<Hash, ConsentGrant>,
    by_subject: HashMap<Address, Vec<Hash>>,
}

impl ConsentManager {
    fn grant(
        &mut self,
        env: &Env,
        researcher: Address,
        data_cid: &str,
        purpose: steward_core::Purpose,
        duration_days: u64,
        signature: &[u8],
    ) -> Hash {
        let id = ConsentGrant::derive_id(&env.sender, &researcher, data_cid, env.nonce);
        let grant = ConsentGrant {
            id,
            subject: env.sender,
            researcher,
            data_cid: data_cid.to_string(),
            purpose,
            granted_at: env.timestamp,
            expires_at: env
                .timestamp
                .saturating_add(duration_days.saturating_mul(SECONDS_PER_DAY)),
            revoked: false,
            signature: signature.to_vec(),
        };
        self.grants.insert(id, grant);
        self.by_subject.entry(env.sender).or_default().push(id);
        id
    }

    /// Only the subject may revoke, and only while the grant is active.
    fn revoke(&mut self, env: &Env, id: &Hash) -> Result<(), Revert> {
        match self.grants.get_mut(id) {
            Some(grant) if grant.subject == env.sender && grant.is_active(env.timestamp) => {
                grant.revoked = true;
                Ok(())
            }
            _ => Err(revert::CONSENT_NOT_FOUND),
        }
    }

    pub fn verify(&self, subject: &Address, researcher: &Address, data_cid: &str, now: u64) -> bool {
        self.consents_of(subject).iter().any(|g| {
            g.researcher == *researcher && g.data_cid == data_cid && g.is_active(now)
        })
    }

    pub fn consents_of(&self, subject: &Address) -> Vec<ConsentGrant> {
        self.by_subject
            .get(subject)
            .map(|ids| ids.iter().filter_map(|id| self.grants.get(id).cloned()).collect())
            .unwrap_or_default()
    }
}

/// Provenance records, one per content identifier.
#[derive(Debug, Default)]
pub struct DataRegistry {
    records: HashMap<String, DataRecord>,
}

impl DataRegistry {
    fn register(&mut self, env: &Env, call: &ContractCall) -> Result<Hash, Revert> {
        let ContractCall::RegisterData {
            cid,
            data_hash,
            size,
            is_encrypted,
            encryption_algorithm,
            metadata,
        } = call
        else {
            return Err(revert::MALFORMED_CALLDATA);
        };

        if self.records.contains_key(cid) {
            return Err(revert::DATA_ALREADY_REGISTERED);
        }

        let record_id = DataRecord::derive_id(&env.sender, cid);
        self.records.insert(
            cid.clone(),
            DataRecord {
                record_id,
                cid: cid.clone(),
                owner: env.sender,
                data_hash: *data_hash,
                size: *size,
                created_at: env.timestamp,
                is_encrypted: *is_encrypted,
                encryption_algorithm: encryption_algorithm.clone(),
                metadata: metadata.clone(),
            },
        );
        Ok(record_id)
    }

    pub fn record(&self, cid: &str) -> Result<&DataRecord, Revert> {
        self.records.get(cid).ok_or(revert::DATA_NOT_FOUND)
    }

    pub fn verify_integrity(&self, cid: &str, data_hash: &Hash) -> Result<bool, Revert> {
        Ok(self.record(cid)?.data_hash == *data_hash)
    }
}

/// Guardian sets per owner and the recovery requests against them.
#[derive(Debug)]
pub struct KeyRecovery {
    threshold: u64,
    guardians: HashMap<Address, Vec<Guardian>>,
    requests: HashMap<Hash, RecoveryRequest>,
    /// Owner to the request that has not reached threshold yet.
    open: HashMap<Address, Hash>,
    /// Requests that reached threshold. Reaching it is final: later guardian
    /// removals lower the live approval count but not the phase.
    settled: HashSet<Hash>,
}

impl KeyRecovery {
    pub fn new(threshold: u64) -> Self {
        Self {
            threshold: threshold.max(1),
            guardians: HashMap::new(),
            requests: HashMap::new(),
            open: HashMap::new(),
            settled: HashSet::new(),
        }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    fn add_guardian(&mut self, env: &Env, guardian: Address, commitment: Hash) -> Result<(), Revert> {
        let set = self.guardians.entry(env.sender).or_default();
        if set.iter().any(|g| g.address == guardian) {
            return Err(revert::GUARDIAN_EXISTS);
        }
        set.push(Guardian {
            address: guardian,
            commitment,
            added_at: env.timestamp,
        });
        Ok(())
    }

    /// A set that can reach threshold is never shrunk below it.
    fn remove_guardian(&mut self, env: &Env, guardian: &Address) -> Result<(), Revert> {
        let threshold = self.threshold;
        let set = self
            .guardians
            .get_mut(&env.sender)
            .ok_or(revert::GUARDIAN_NOT_FOUND)?;
        let pos = set
            .iter()
            .position(|g| g.address == *guardian)
            .ok_or(revert::GUARDIAN_NOT_FOUND)?;
        let len = set.len() as u64;
        if len >= threshold && len - 1 < threshold {
            return Err(revert::GUARDIAN_SET_BELOW_THRESHOLD);
        }
        set.remove(pos);
        Ok(())
    }

    fn initiate(&mut self, env: &Env, new_key_hash: Hash) -> Result<Hash, Revert> {
        if self.open.contains_key(&env.sender) {
            return Err(revert::RECOVERY_ALREADY_OPEN);
        }
        if (self.guardians_of(&env.sender).len() as u64) < self.threshold {
            return Err(revert::INSUFFICIENT_GUARDIANS);
        }

        let id = RecoveryRequest::derive_id(&env.sender, &new_key_hash, env.nonce);
        self.requests.insert(
            id,
            RecoveryRequest {
                id,
                owner: env.sender,
                new_key_hash,
                initiated_at: env.timestamp,
                approvals: Vec::new(),
            },
        );
        self.open.insert(env.sender, id);
        Ok(id)
    }

    fn approve(&mut self, env: &Env, request_id: &Hash, share_hash: Hash) -> Result<RecoveryStatus, Revert> {
        let owner = self
            .requests
            .get(request_id)
            .ok_or(revert::RECOVERY_NOT_FOUND)?
            .owner;
        if !self.is_guardian(&owner, &env.sender) {
            return Err(revert::NOT_GUARDIAN);
        }

        let request = self
            .requests
            .get_mut(request_id)
            .ok_or(revert::RECOVERY_NOT_FOUND)?;
        if request.has_approved(&env.sender) {
            return Err(revert::DUPLICATE_APPROVAL);
        }
        request.approvals.push(Approval {
            guardian: env.sender,
            share_hash,
        });

        let status = self.status(request_id)?;
        if status.is_actionable()
            && self.settled.insert(*request_id)
            && self.open.get(&owner) == Some(request_id)
        {
            self.open.remove(&owner);
        }
        Ok(status)
    }

    pub fn guardians_of(&self, owner: &Address) -> &[Guardian] {
        self.guardians.get(owner).map(Vec::as_slice).unwrap_or(&[])
    }

    fn is_guardian(&self, owner: &Address, who: &Address) -> bool {
        self.guardians_of(owner).iter().any(|g| g.address == *who)
    }

    /// Progress of a request. Only approvals from guardians still in the
    /// owner's set count; a settled request stays actionable.
    pub fn status(&self, request_id: &Hash) -> Result<RecoveryStatus, Revert> {
        let request = self
            .requests
            .get(request_id)
            .ok_or(revert::RECOVERY_NOT_FOUND)?;
        let approvals = request
            .approvals
            .iter()
            .filter(|a| self.is_guardian(&request.owner, &a.guardian))
            .count() as u64;
        let mut status = RecoveryStatus::new(*request_id, request.owner, approvals, self.threshold);
        if self.settled.contains(request_id) {
            status.phase = RecoveryPhase::Actionable;
        }
        Ok(status)
    }

    pub fn open_request(&self, owner: &Address) -> Option<RecoveryRequest> {
        self.open
            .get(owner)
            .and_then(|id| self.requests.get(id))
            .cloned()
    }
}

/// The three deployed contracts.
#[derive(Debug)]
pub struct Contracts {
    pub addresses: ContractAddresses,
    pub consent: ConsentManager,
    pub data: DataRegistry,
    pub recovery: KeyRecovery,
}

impl Contracts {
    pub fn new(addresses: ContractAddresses, recovery_threshold: u64) -> Self {
        Self {
            addresses,
            consent: ConsentManager::default(),
            data: DataRegistry::default(),
            recovery: KeyRecovery::new(recovery_threshold),
        }
    }

    fn route(&self, to: &Address, contract: Contract) -> Result<(), Revert> {
        match self.addresses.contract_at(to) {
            Some(found) if found == contract => Ok(()),
            Some(_) => Err(revert::MALFORMED_CALLDATA),
            None => Err(revert::UNKNOWN_CONTRACT),
        }
    }

    /// Apply a state-changing call sent to `to`.
    ///
    /// A revert leaves every contract untouched.
    pub fn execute(&mut self, to: &Address, call: &ContractCall, env: &Env) -> Result<Vec<u8>, Revert> {
        self.route(to, call.contract())?;

        match call {
            ContractCall::GrantConsent {
                researcher,
                data_cid,
                purpose,
                duration_days,
                signature,
            } => {
                let id = self.consent.grant(
                    env,
                    *researcher,
                    data_cid,
                    *purpose,
                    *duration_days,
                    signature,
                );
                Ok(encode_output(&id))
            }
            ContractCall::RevokeConsent { consent_id } => {
                self.consent.revoke(env, consent_id)?;
                Ok(encode_output(&()))
            }
            ContractCall::RegisterData { .. } => {
                let id = self.data.register(env, call)?;
                Ok(encode_output(&id))
            }
            ContractCall::AddGuardian {
                guardian,
                commitment,
            } => {
                self.recovery.add_guardian(env, *guardian, *commitment)?;
                Ok(encode_output(&()))
            }
            ContractCall::RemoveGuardian { guardian } => {
                self.recovery.remove_guardian(env, guardian)?;
                Ok(encode_output(&()))
            }
            ContractCall::InitiateRecovery { new_key_hash } => {
                let id = self.recovery.initiate(env, *new_key_hash)?;
                Ok(encode_output(&id))
            }
            ContractCall::ApproveRecovery {
                request_id,
                share_hash,
            } => {
                let status = self.recovery.approve(env, request_id, *share_hash)?;
                Ok(encode_output(&status))
            }
        }
    }

    /// Answer a read-only query sent to `to` at ledger time `now`.
    pub fn query(&self, to: &Address, query: &ContractQuery, now: u64) -> Result<Vec<u8>, Revert> {
        self.route(to, query.contract())?;

        Ok(match query {
            ContractQuery::VerifyConsent {
                subject,
                researcher,
                data_cid,
            } => encode_output(&self.consent.verify(subject, researcher, data_cid, now)),
            ContractQuery::UserConsents { subject } => {
                encode_output(&self.consent.consents_of(subject))
            }
            ContractQuery::VerifyDataIntegrity { cid, data_hash } => {
                encode_output(&self.data.verify_integrity(cid, data_hash)?)
            }
            ContractQuery::DataRecord { cid } => encode_output(self.data.record(cid)?),
            ContractQuery::Guardians { owner } => {
                encode_output(&self.recovery.guardians_of(owner).to_vec())
            }
            ContractQuery::RecoveryStatus { request_id } => {
                encode_output(&self.recovery.status(request_id)?)
            }
            ContractQuery::OpenRecovery { owner } => {
                encode_output(&self.recovery.open_request(owner))
            }
        })
    }
}

/// Gas charged for running `call`, on top of the intrinsic cost.
pub fn execution_gas(call: &ContractCall) -> u64 {
    match call {
        ContractCall::GrantConsent { .. } => 90_000,
        ContractCall::RevokeConsent { .. } => 25_000,
        ContractCall::RegisterData { .. } => 140_000,
        ContractCall::AddGuardian { .. } => 45_000,
        ContractCall::RemoveGuardian { .. } => 20_000,
        ContractCall::InitiateRecovery { .. } => 65_000,
        ContractCall::ApproveRecovery { .. } => 50_000,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use steward_core::{decode_output, sha256, DataMetadata, Purpose, RecoveryPhase};

    fn addr(n: u8) -> Address {
        Address::from_bytes([n; 20])
    }

    fn env(sender: Address, nonce: u64, timestamp: u64) -> Env {
        Env {
            sender,
            nonce,
            timestamp,
        }
    }

    fn contracts(threshold: u64) -> Contracts {
        Contracts::new(ContractAddresses::deployed_by(&addr(0xde)), threshold)
    }

    #[test]
    fn test_consent_expires_and_revokes() {
        let mut c = contracts(3);
        let subject = addr(1);
        let researcher = addr(2);
        let to = c.addresses.consent_manager;

        let out = c
            .execute(
                &to,
                &ContractCall::GrantConsent {
                    researcher,
                    data_cid: "bafk".into(),
                    purpose: Purpose::Research,
                    duration_days: 2,
                    signature: vec![1, 2, 3],
                },
                &env(subject, 0, 1_000),
            )
            .unwrap();
        let id: Hash = decode_output(&out).unwrap();

        assert!(c.consent.verify(&subject, &researcher, "bafk", 1_000 + SECONDS_PER_DAY));
        assert!(!c.consent.verify(&subject, &researcher, "bafk", 1_000 + 2 * SECONDS_PER_DAY));
        assert!(!c.consent.verify(&subject, &addr(3), "bafk", 1_000));

        // Only the subject can revoke.
        let revoke = ContractCall::RevokeConsent { consent_id: id };
        assert_eq!(
            c.execute(&to, &revoke, &env(researcher, 0, 1_001)),
            Err(revert::CONSENT_NOT_FOUND)
        );
        c.execute(&to, &revoke, &env(subject, 1, 1_001)).unwrap();
        assert!(!c.consent.verify(&subject, &researcher, "bafk", 1_002));
        assert_eq!(
            c.execute(&to, &revoke, &env(subject, 2, 1_003)),
            Err(revert::CONSENT_NOT_FOUND)
        );
    }

    #[test]
    fn test_data_registered_once() {
        let mut c = contracts(3);
        let to = c.addresses.data_registry;
        let call = ContractCall::RegisterData {
            cid: "bafkrei".into(),
            data_hash: sha256(b"payload"),
            size: 7,
            is_encrypted: false,
            encryption_algorithm: String::new(),
            metadata: DataMetadata::default(),
        };

        c.execute(&to, &call, &env(addr(1), 0, 5)).unwrap();
        assert_eq!(
            c.execute(&to, &call, &env(addr(2), 0, 6)),
            Err(revert::DATA_ALREADY_REGISTERED)
        );
        assert_eq!(c.data.verify_integrity("bafkrei", &sha256(b"payload")), Ok(true));
        assert_eq!(c.data.verify_integrity("bafkrei", &sha256(b"other")), Ok(false));
        assert_eq!(
            c.data.verify_integrity("unknown", &sha256(b"payload")),
            Err(revert::DATA_NOT_FOUND)
        );
    }

    #[test]
    fn test_calls_must_reach_their_contract() {
        let mut c = contracts(3);
        let call = ContractCall::RevokeConsent {
            consent_id: Hash::ZERO,
        };
        let registry = c.addresses.data_registry;
        assert_eq!(
            c.execute(&registry, &call, &env(addr(1), 0, 0)),
            Err(revert::MALFORMED_CALLDATA)
        );
        assert_eq!(
            c.execute(&addr(0x77), &call, &env(addr(1), 0, 0)),
            Err(revert::UNKNOWN_CONTRACT)
        );
    }

    fn setup_guardians(c: &mut Contracts, owner: Address, guardians: &[Address]) {
        let to = c.addresses.key_recovery;
        for (i, g) in guardians.iter().enumerate() {
            c.execute(
                &to,
                &ContractCall::AddGuardian {
                    guardian: *g,
                    commitment: sha256(&[i as u8]),
                },
                &env(owner, i as u64, 10),
            )
            .unwrap();
        }
    }

    #[test]
    fn test_recovery_threshold() {
        let mut c = contracts(3);
        let owner = addr(1);
        let guardians = [addr(10), addr(11), addr(12), addr(13), addr(14)];
        setup_guardians(&mut c, owner, &guardians);
        let to = c.addresses.key_recovery;

        let out = c
            .execute(
                &to,
                &ContractCall::InitiateRecovery {
                    new_key_hash: sha256(b"new key"),
                },
                &env(owner, 5, 20),
            )
            .unwrap();
        let id: Hash = decode_output(&out).unwrap();
        assert_eq!(c.recovery.status(&id).unwrap().phase, RecoveryPhase::Initiated);

        let approve = |c: &mut Contracts, g: Address| {
            c.execute(
                &to,
                &ContractCall::ApproveRecovery {
                    request_id: id,
                    share_hash: sha256(g.as_ref()),
                },
                &env(g, 0, 30),
            )
        };

        approve(&mut c, guardians[0]).unwrap();
        assert_eq!(approve(&mut c, guardians[0]), Err(revert::DUPLICATE_APPROVAL));
        approve(&mut c, guardians[1]).unwrap();
        assert_eq!(c.recovery.status(&id).unwrap().phase, RecoveryPhase::Approving);
        assert!(c.recovery.open_request(&owner).is_some());

        let out = approve(&mut c, guardians[2]).unwrap();
        let status: RecoveryStatus = decode_output(&out).unwrap();
        assert!(status.is_actionable());
        assert!(c.recovery.open_request(&owner).is_none());

        assert_eq!(approve(&mut c, addr(99)), Err(revert::NOT_GUARDIAN));
    }

    #[test]
    fn test_recovery_needs_enough_guardians() {
        let mut c = contracts(3);
        let owner = addr(1);
        setup_guardians(&mut c, owner, &[addr(10), addr(11)]);
        let to = c.addresses.key_recovery;
        assert_eq!(
            c.execute(
                &to,
                &ContractCall::InitiateRecovery {
                    new_key_hash: Hash::ZERO
                },
                &env(owner, 2, 20)
            ),
            Err(revert::INSUFFICIENT_GUARDIANS)
        );
    }

    #[test]
    fn test_one_open_request_per_owner() {
        let mut c = contracts(1);
        let owner = addr(1);
        setup_guardians(&mut c, owner, &[addr(10)]);
        let to = c.addresses.key_recovery;
        let initiate = ContractCall::InitiateRecovery {
            new_key_hash: sha256(b"k"),
        };
        c.execute(&to, &initiate, &env(owner, 1, 20)).unwrap();
        assert_eq!(
            c.execute(&to, &initiate, &env(owner, 2, 21)),
            Err(revert::RECOVERY_ALREADY_OPEN)
        );
    }

    #[test]
    fn test_removed_guardian_approvals_stop_counting() {
        let mut c = contracts(2);
        let owner = addr(1);
        let guardians = [addr(10), addr(11), addr(12)];
        setup_guardians(&mut c, owner, &guardians);
        let to = c.addresses.key_recovery;

        let out = c
            .execute(
                &to,
                &ContractCall::InitiateRecovery {
                    new_key_hash: sha256(b"k"),
                },
                &env(owner, 3, 20),
            )
            .unwrap();
        let id: Hash = decode_output(&out).unwrap();
        c.execute(
            &to,
            &ContractCall::ApproveRecovery {
                request_id: id,
                share_hash: Hash::ZERO,
            },
            &env(guardians[0], 0, 21),
        )
        .unwrap();
        assert_eq!(c.recovery.status(&id).unwrap().approvals, 1);

        c.execute(
            &to,
            &ContractCall::RemoveGuardian {
                guardian: guardians[0],
            },
            &env(owner, 4, 22),
        )
        .unwrap();
        assert_eq!(c.recovery.status(&id).unwrap().approvals, 0);

        // Two left with threshold two: removing another is refused.
        assert_eq!(
            c.execute(
                &to,
                &ContractCall::RemoveGuardian {
                    guardian: guardians[1]
                },
                &env(owner, 5, 23)
            ),
            Err(revert::GUARDIAN_SET_BELOW_THRESHOLD)
        );
        assert_eq!(
            c.execute(
                &to,
                &ContractCall::RemoveGuardian {
                    guardian: addr(99)
                },
                &env(owner, 6, 24)
            ),
            Err(revert::GUARDIAN_NOT_FOUND)
        );
    }

    #[test]
    fn test_actionable_is_final() {
        let mut c = contracts(2);
        let owner = addr(1);
        let guardians = [addr(10), addr(11), addr(12)];
        setup_guardians(&mut c, owner, &guardians);
        let to = c.addresses.key_recovery;

        let out = c
            .execute(
                &to,
                &ContractCall::InitiateRecovery {
                    new_key_hash: sha256(b"k"),
                },
                &env(owner, 3, 20),
            )
            .unwrap();
        let id: Hash = decode_output(&out).unwrap();
        for g in &guardians[..2] {
            c.execute(
                &to,
                &ContractCall::ApproveRecovery {
                    request_id: id,
                    share_hash: Hash::ZERO,
                },
                &env(*g, 0, 21),
            )
            .unwrap();
        }
        assert!(c.recovery.status(&id).unwrap().is_actionable());
        assert!(c.recovery.open_request(&owner).is_none());

        c.execute(
            &to,
            &ContractCall::RemoveGuardian {
                guardian: guardians[0],
            },
            &env(owner, 4, 22),
        )
        .unwrap();
        let status = c.recovery.status(&id).unwrap();
        assert_eq!(status.approvals, 1);
        assert_eq!(status.phase, RecoveryPhase::Actionable);
        assert!(c.recovery.open_request(&owner).is_none());

        // The owner is free to open a new request.
        c.execute(
            &to,
            &ContractCall::InitiateRecovery {
                new_key_hash: sha256(b"k2"),
            },
            &env(owner, 5, 23),
        )
        .unwrap();
        assert!(c.recovery.open_request(&owner).is_some());
    }
}
