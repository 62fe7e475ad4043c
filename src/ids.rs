//! Type aliases for database row identifiers.
//!
//! All entities use SQLite integer row IDs. The aliases document which kind
//! of row a function expects without the ceremony of newtype wrappers.

/// The type of database row IDs.
pub type DatabaseId = i64;

/// The ID of an association.
pub type AssociationId = DatabaseId;
/// The ID of a team.
pub type TeamId = DatabaseId;
/// The ID of a team season.
pub type TeamSeasonId = DatabaseId;
/// The ID of a policy snapshot.
pub type SnapshotId = DatabaseId;
/// The ID of a roster family.
pub type FamilyId = DatabaseId;
/// The ID of a budget.
pub type BudgetId = DatabaseId;
/// The ID of a budget version.
pub type BudgetVersionId = DatabaseId;
/// The ID of a budget envelope.
pub type EnvelopeId = DatabaseId;
/// The ID of a transaction.
pub type TransactionId = DatabaseId;
/// The ID of a spending category.
pub type CategoryId = DatabaseId;
/// The ID of an association rule.
pub type RuleId = DatabaseId;
/// The ID of a team rule override.
pub type RuleOverrideId = DatabaseId;
/// The ID of a user.
pub type UserId = DatabaseId;
