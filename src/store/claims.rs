use anyhow::{Context, Result};
use docket_common::PhaseCode;
use rusqlite::params;

use super::{DocketDb, StoredClaim, parse_enum};
use crate::citation::{Claim, ClaimVerification, normalize_verified};

struct ClaimRow {
    id: i64,
    order_id: i64,
    origin_phase: String,
    loop_number: u32,
    proposition: String,
    citation: String,
    quoted_text: Option<String>,
    sole_authority: bool,
    dispositive_element: bool,
    status: Option<String>,
    verified: bool,
    source_id: Option<String>,
    scores: String,
    composite: Option<f64>,
    verdict: Option<String>,
    flags: String,
    verified_phase: Option<String>,
    verified_loop: Option<u32>,
}

impl ClaimRow {
    fn into_claim(self) -> Result<StoredClaim> {
        Ok(StoredClaim {
            id: self.id,
            order_id: self.order_id,
            origin_phase: parse_enum(&self.origin_phase, "claim origin phase")?,
            loop_number: self.loop_number,
            claim: Claim {
                proposition: self.proposition,
                citation: serde_json::from_str(&self.citation)
                    .context("Failed to parse claim citation JSON")?,
                quoted_text: self.quoted_text,
                sole_authority: self.sole_authority,
                dispositive_element: self.dispositive_element,
            },
            status: self
                .status
                .as_deref()
                .map(|s| parse_enum(s, "citation status"))
                .transpose()?,
            verified: self.verified,
            source_id: self.source_id,
            scores: serde_json::from_str(&self.scores).context("Failed to parse claim scores")?,
            composite: self.composite,
            verdict: self
                .verdict
                .as_deref()
                .map(|s| parse_enum(s, "claim verdict"))
                .transpose()?,
            flags: serde_json::from_str(&self.flags).context("Failed to parse claim flags")?,
            verified_phase: self
                .verified_phase
                .as_deref()
                .map(|s| parse_enum(s, "verification phase"))
                .transpose()?,
            verified_loop: self.verified_loop,
        })
    }
}

impl DocketDb {
    /// Insert claims emitted by `origin`. Replays are absorbed by the
    /// per-order dedupe key. Returns how many rows were new.
    pub fn insert_claims(
        &self,
        order_id: i64,
        origin: PhaseCode,
        loop_number: u32,
        claims: &[Claim],
    ) -> Result<usize> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin claim insert")?;
        let mut inserted = 0;
        for claim in claims {
            let citation =
                serde_json::to_string(&claim.citation).context("Failed to serialize citation")?;
            inserted += tx
                .execute(
                    "INSERT OR IGNORE INTO claims (order_id, origin_phase, loop_number, claim_key, proposition, citation, quoted_text, sole_authority, dispositive_element)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        order_id,
                        origin.as_str(),
                        loop_number,
                        claim.dedupe_key(origin, loop_number),
                        claim.proposition,
                        citation,
                        claim.quoted_text,
                        claim.sole_authority,
                        claim.dispositive_element,
                    ],
                )
                .context("Failed to insert claim")?;
        }
        tx.commit().context("Failed to commit claims")?;
        Ok(inserted)
    }

    pub fn list_claims(&self, order_id: i64) -> Result<Vec<StoredClaim>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, order_id, origin_phase, loop_number, proposition, citation, quoted_text, sole_authority, dispositive_element,
                        status, verified, source_id, scores, composite, verdict, flags, verified_phase, verified_loop
                 FROM claims WHERE order_id = ?1 ORDER BY id",
            )
            .context("Failed to prepare list_claims")?;
        let rows = stmt
            .query_map(params![order_id], |row| {
                Ok(ClaimRow {
                    id: row.get(0)?,
                    order_id: row.get(1)?,
                    origin_phase: row.get(2)?,
                    loop_number: row.get(3)?,
                    proposition: row.get(4)?,
                    citation: row.get(5)?,
                    quoted_text: row.get(6)?,
                    sole_authority: row.get(7)?,
                    dispositive_element: row.get(8)?,
                    status: row.get(9)?,
                    verified: row.get(10)?,
                    source_id: row.get(11)?,
                    scores: row.get(12)?,
                    composite: row.get(13)?,
                    verdict: row.get(14)?,
                    flags: row.get(15)?,
                    verified_phase: row.get(16)?,
                    verified_loop: row.get(17)?,
                })
            })
            .context("Failed to query claims")?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("Failed to read claim row")?.into_claim()?);
        }
        Ok(out)
    }

    pub fn pending_claims(&self, order_id: i64) -> Result<Vec<StoredClaim>> {
        Ok(self
            .list_claims(order_id)?
            .into_iter()
            .filter(StoredClaim::is_pending)
            .collect())
    }

    /// Claims whose verification was recorded by `phase` in `loop_number`.
    pub fn claims_verified_in(
        &self,
        order_id: i64,
        phase: PhaseCode,
        loop_number: u32,
    ) -> Result<Vec<StoredClaim>> {
        Ok(self
            .list_claims(order_id)?
            .into_iter()
            .filter(|c| c.verified_phase == Some(phase) && c.verified_loop == Some(loop_number))
            .collect())
    }

    /// Record a verification result. Only unverified or deferred claims are
    /// written; a final verdict is never overwritten. `(verified, no source)`
    /// is normalized to unmatched before the write. Returns whether this
    /// call wrote the row.
    pub fn save_verification(
        &self,
        claim_id: i64,
        phase: PhaseCode,
        loop_number: u32,
        result: &ClaimVerification,
    ) -> Result<bool> {
        let (verified, status) =
            normalize_verified(result.verified, result.source_id.as_deref(), result.status);
        let scores = serde_json::to_string(&result.scores).context("Failed to serialize scores")?;
        let flags = serde_json::to_string(&result.flags).context("Failed to serialize flags")?;
        let changed = self
            .conn
            .execute(
                "UPDATE claims
                 SET status = ?2, verified = ?3, source_id = ?4, scores = ?5, composite = ?6,
                     verdict = ?7, flags = ?8, verified_phase = ?9, verified_loop = ?10
                 WHERE id = ?1 AND (verdict IS NULL OR verdict = 'DEFERRED')",
                params![
                    claim_id,
                    status.as_str(),
                    verified,
                    result.source_id,
                    scores,
                    result.composite,
                    result.verdict.as_str(),
                    flags,
                    phase.as_str(),
                    loop_number,
                ],
            )
            .context("Failed to save claim verification")?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::citation::{Citation, Flag, FlagKind, StepScores, Verdict};
    use crate::store::test_support::db_with_order;
    use docket_common::{CitationStatus, Tier};

    fn claim(prop: &str) -> Claim {
        Claim {
            proposition: prop.into(),
            citation: Citation {
                raw: "477 U.S. 317".into(),
                volume: Some(477),
                reporter: Some("U.S.".into()),
                page: Some(317),
                ..Default::default()
            },
            quoted_text: None,
            sole_authority: false,
            dispositive_element: true,
        }
    }

    fn verification(verified: bool, source_id: Option<&str>) -> ClaimVerification {
        ClaimVerification {
            verdict: if verified { Verdict::Verified } else { Verdict::Failed },
            status: if verified {
                CitationStatus::DraftVerified
            } else {
                CitationStatus::Failed
            },
            verified,
            source_id: source_id.map(String::from),
            scores: StepScores {
                existence: Some(1.0),
                ..Default::default()
            },
            composite: 0.9,
            flags: vec![Flag::new(FlagKind::WeakAuthority, "district court")],
            second_stage: false,
        }
    }

    #[test]
    fn test_replayed_claim_insert_is_absorbed() -> Result<()> {
        let (db, order) = db_with_order(Tier::B);
        let claims = vec![claim("a"), claim("b")];
        assert_eq!(db.insert_claims(order.id, PhaseCode::Drafting, 0, &claims)?, 2);
        assert_eq!(db.insert_claims(order.id, PhaseCode::Drafting, 0, &claims)?, 0);
        assert_eq!(db.pending_claims(order.id)?.len(), 2);
        Ok(())
    }

    #[test]
    fn test_verification_is_written_once() -> Result<()> {
        let (db, order) = db_with_order(Tier::B);
        db.insert_claims(order.id, PhaseCode::Drafting, 0, &[claim("a")])?;
        let id = db.pending_claims(order.id)?[0].id;
        assert!(db.save_verification(id, PhaseCode::CitationCheck, 0, &verification(true, Some("cl-9")))?);
        assert!(!db.save_verification(id, PhaseCode::CitationCheck, 0, &verification(false, None))?);

        let stored = &db.list_claims(order.id)?[0];
        assert!(stored.verified);
        assert_eq!(stored.source_id.as_deref(), Some("cl-9"));
        assert_eq!(stored.flags[0].kind, FlagKind::WeakAuthority);
        assert_eq!(db.claims_verified_in(order.id, PhaseCode::CitationCheck, 0)?.len(), 1);
        assert!(db.pending_claims(order.id)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_verified_without_source_is_stored_unmatched() -> Result<()> {
        let (db, order) = db_with_order(Tier::B);
        db.insert_claims(order.id, PhaseCode::Drafting, 0, &[claim("a")])?;
        let id = db.pending_claims(order.id)?[0].id;
        db.save_verification(id, PhaseCode::CitationCheck, 0, &verification(true, None))?;
        let stored = &db.list_claims(order.id)?[0];
        assert!(!stored.verified);
        assert_eq!(stored.status, Some(CitationStatus::Unmatched));
        Ok(())
    }

    #[test]
    fn test_deferred_claim_stays_pending_until_reverified() -> Result<()> {
        let (db, order) = db_with_order(Tier::B);
        db.insert_claims(order.id, PhaseCode::Drafting, 0, &[claim("a")])?;
        let id = db.pending_claims(order.id)?[0].id;

        let mut deferred = verification(false, None);
        deferred.verdict = Verdict::Deferred;
        deferred.status = CitationStatus::VerificationDeferred;
        assert!(db.save_verification(id, PhaseCode::CitationCheck, 0, &deferred)?);
        assert_eq!(db.pending_claims(order.id)?.len(), 1);

        assert!(db.save_verification(id, PhaseCode::CitationCheck, 0, &verification(true, Some("cl-2")))?);
        assert!(db.pending_claims(order.id)?.is_empty());
        Ok(())
    }
}
