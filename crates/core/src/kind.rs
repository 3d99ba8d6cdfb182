use std::{fmt, str::FromStr};

use crate::CatalogError;

/// Closed catalog of installable object kinds.
///
/// Declaration order is the create order: foundational kinds first. Drops
/// run in the exact reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SchemaObjectKind {
    PreScript,
    MasterKey,
    Certificate,
    SymmetricKey,
    Login,
    User,
    Role,
    Schema,
    PartitionFunction,
    PartitionScheme,
    MessageType,
    Contract,
    Queue,
    Service,
    BrokerPriority,
    UserDefinedType,
    Table,
    PrimaryKey,
    Index,
    ForeignKey,
    Constraint,
    Default,
    Function,
    View,
    IndexedView,
    StoredProcedure,
    Trigger,
    AutoProc,
    Permission,
    Script,
    Unused,
}

impl SchemaObjectKind {
    pub const ALL: [Self; 31] = [
        Self::PreScript,
        Self::MasterKey,
        Self::Certificate,
        Self::SymmetricKey,
        Self::Login,
        Self::User,
        Self::Role,
        Self::Schema,
        Self::PartitionFunction,
        Self::PartitionScheme,
        Self::MessageType,
        Self::Contract,
        Self::Queue,
        Self::Service,
        Self::BrokerPriority,
        Self::UserDefinedType,
        Self::Table,
        Self::PrimaryKey,
        Self::Index,
        Self::ForeignKey,
        Self::Constraint,
        Self::Default,
        Self::Function,
        Self::View,
        Self::IndexedView,
        Self::StoredProcedure,
        Self::Trigger,
        Self::AutoProc,
        Self::Permission,
        Self::Script,
        Self::Unused,
    ];

    /// Value stored in the registry `Type` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PreScript => "PreScript",
            Self::MasterKey => "MasterKey",
            Self::Certificate => "Certificate",
            Self::SymmetricKey => "SymmetricKey",
            Self::Login => "Login",
            Self::User => "User",
            Self::Role => "Role",
            Self::Schema => "Schema",
            Self::PartitionFunction => "PartitionFunction",
            Self::PartitionScheme => "PartitionScheme",
            Self::MessageType => "MessageType",
            Self::Contract => "Contract",
            Self::Queue => "Queue",
            Self::Service => "Service",
            Self::BrokerPriority => "BrokerPriority",
            Self::UserDefinedType => "UserDefinedType",
            Self::Table => "Table",
            Self::PrimaryKey => "PrimaryKey",
            Self::Index => "Index",
            Self::ForeignKey => "ForeignKey",
            Self::Constraint => "Constraint",
            Self::Default => "Default",
            Self::Function => "Function",
            Self::View => "View",
            Self::IndexedView => "IndexedView",
            Self::StoredProcedure => "StoredProcedure",
            Self::Trigger => "Trigger",
            Self::AutoProc => "AutoProc",
            Self::Permission => "Permission",
            Self::Script => "Script",
            Self::Unused => "Unused",
        }
    }

    /// Create-order rank; lower installs earlier.
    #[must_use]
    pub const fn priority(self) -> u8 {
        self as u8
    }

    /// Certificates, keys and scripts are never dropped.
    #[must_use]
    pub const fn is_droppable(self) -> bool {
        !matches!(
            self,
            Self::MasterKey
                | Self::Certificate
                | Self::SymmetricKey
                | Self::Script
                | Self::PreScript
                | Self::Unused
        )
    }

    /// Kinds whose canonical name is `[schema].[table].[name]`.
    #[must_use]
    pub const fn is_table_scoped(self) -> bool {
        matches!(
            self,
            Self::PrimaryKey
                | Self::ForeignKey
                | Self::Constraint
                | Self::Default
                | Self::Index
                | Self::IndexedView
        )
    }

    /// Scripts have no catalog footprint to verify.
    #[must_use]
    pub const fn is_verifiable(self) -> bool {
        !matches!(self, Self::Script | Self::PreScript | Self::Unused)
    }
}

impl fmt::Display for SchemaObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaObjectKind {
    type Err = CatalogError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| CatalogError::UnknownKind {
                value: trimmed.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::SchemaObjectKind;

    #[test]
    fn create_order_puts_foundations_first() {
        use SchemaObjectKind as K;
        assert!(K::UserDefinedType < K::Table);
        assert!(K::Table < K::PrimaryKey);
        assert!(K::Index < K::View);
        assert!(K::View < K::StoredProcedure);
        assert!(K::StoredProcedure < K::Permission);
    }

    #[test]
    fn registry_names_round_trip() {
        for kind in SchemaObjectKind::ALL {
            let parsed: SchemaObjectKind = kind.as_str().parse().expect("known kind");
            assert_eq!(parsed, kind);
        }
        assert!("Sequence".parse::<SchemaObjectKind>().is_err());
    }
}
