// Catalog queries. Every projection is cast to a string so adapters only
// need to surface text columns; `@P1`, `@P2`, ... are bound parameters.

pub(crate) const OBJECT_EXISTS_QUERY: &str = r#"
SELECT COUNT(*) FROM sys.objects WHERE object_id = OBJECT_ID(@P1);
"#;

pub(crate) const INDEX_EXISTS_QUERY: &str = r#"
SELECT COUNT(*) FROM sys.indexes WHERE object_id = OBJECT_ID(@P1) AND name = @P2;
"#;

pub(crate) const TYPE_EXISTS_QUERY: &str = r#"
SELECT COUNT(*) FROM sys.types WHERE is_user_defined = 1 AND user_type_id = TYPE_ID(@P1);
"#;

pub(crate) const DATABASE_PRINCIPAL_EXISTS_QUERY: &str = r#"
SELECT COUNT(*) FROM sys.database_principals WHERE name = @P1;
"#;

pub(crate) const LOGIN_EXISTS_QUERY: &str = r#"
SELECT COUNT(*) FROM sys.server_principals WHERE name = @P1;
"#;

pub(crate) const SCHEMA_EXISTS_QUERY: &str = r#"
SELECT COUNT(*) FROM sys.schemas WHERE name = @P1;
"#;

pub(crate) const CERTIFICATE_EXISTS_QUERY: &str = r#"
SELECT COUNT(*) FROM sys.certificates WHERE name = @P1;
"#;

pub(crate) const SYMMETRIC_KEY_EXISTS_QUERY: &str = r#"
SELECT COUNT(*) FROM sys.symmetric_keys WHERE name = @P1;
"#;

pub(crate) const PARTITION_FUNCTION_EXISTS_QUERY: &str = r#"
SELECT COUNT(*) FROM sys.partition_functions WHERE name = @P1;
"#;

pub(crate) const PARTITION_SCHEME_EXISTS_QUERY: &str = r#"
SELECT COUNT(*) FROM sys.partition_schemes WHERE name = @P1;
"#;

pub(crate) const MESSAGE_TYPE_EXISTS_QUERY: &str = r#"
SELECT COUNT(*) FROM sys.service_message_types WHERE name = @P1;
"#;

pub(crate) const CONTRACT_EXISTS_QUERY: &str = r#"
SELECT COUNT(*) FROM sys.service_contracts WHERE name = @P1;
"#;

pub(crate) const SERVICE_EXISTS_QUERY: &str = r#"
SELECT COUNT(*) FROM sys.services WHERE name = @P1;
"#;

pub(crate) const BROKER_PRIORITY_EXISTS_QUERY: &str = r#"
SELECT COUNT(*) FROM sys.conversation_priorities WHERE name = @P1;
"#;

/// @P1 permission name, @P2 principal, @P3 securable, @P4 class
/// (0 database, 1 object, 3 schema, 6 type).
pub(crate) const PERMISSION_EXISTS_QUERY: &str = r#"
SELECT COUNT(*)
FROM sys.database_permissions AS p
JOIN sys.database_principals AS pr ON pr.principal_id = p.grantee_principal_id
WHERE p.permission_name = @P1
  AND pr.name = @P2
  AND p.minor_id = 0
  AND p.class = CAST(@P4 AS int)
  AND p.major_id = CASE CAST(@P4 AS int)
        WHEN 1 THEN OBJECT_ID(@P3)
        WHEN 3 THEN SCHEMA_ID(@P3)
        WHEN 6 THEN TYPE_ID(@P3)
        ELSE 0
      END;
"#;

pub(crate) const COLUMN_DEFINITIONS_QUERY: &str = r#"
SELECT
    c.name AS column_name,
    CASE WHEN ty.is_user_defined = 1
        THEN QUOTENAME(SCHEMA_NAME(ty.schema_id)) + '.' + QUOTENAME(ty.name)
        ELSE ty.name
    END AS data_type,
    CAST(c.max_length AS nvarchar(32)) AS max_length,
    CAST(c.precision AS nvarchar(32)) AS precision,
    CAST(c.scale AS nvarchar(32)) AS scale,
    CASE WHEN c.is_identity = 1 THEN '1' ELSE '0' END AS is_identity,
    CASE WHEN c.is_computed = 1 OR ty.name IN ('timestamp', 'rowversion') THEN '1' ELSE '0' END AS is_read_only,
    CASE WHEN EXISTS (
        SELECT 1
        FROM sys.indexes AS i
        JOIN sys.index_columns AS ic ON ic.object_id = i.object_id AND ic.index_id = i.index_id
        WHERE i.object_id = c.object_id AND i.is_primary_key = 1 AND ic.column_id = c.column_id
    ) THEN '1' ELSE '0' END AS is_key
FROM sys.columns AS c
JOIN sys.types AS ty ON c.user_type_id = ty.user_type_id
WHERE c.object_id = OBJECT_ID(@P1)
ORDER BY c.column_id ASC;
"#;

pub(crate) const TABLE_COLUMNS_QUERY: &str = r#"
SELECT
    c.name AS column_name,
    CASE WHEN ty.is_user_defined = 1
        THEN QUOTENAME(SCHEMA_NAME(ty.schema_id)) + '.' + QUOTENAME(ty.name)
        ELSE ty.name
    END AS data_type,
    CAST(c.max_length AS nvarchar(32)) AS max_length,
    CAST(c.precision AS nvarchar(32)) AS precision,
    CAST(c.scale AS nvarchar(32)) AS scale,
    CASE WHEN c.is_nullable = 1 THEN '1' ELSE '0' END AS is_nullable,
    CASE WHEN c.is_identity = 1 THEN '1' ELSE '0' END AS is_identity,
    CAST(ic.seed_value AS nvarchar(64)) AS seed_value,
    CAST(ic.increment_value AS nvarchar(64)) AS increment_value,
    cc.definition AS computed_definition,
    CASE WHEN cc.is_persisted = 1 THEN '1' ELSE '0' END AS is_persisted,
    c.collation_name AS collation_name
FROM sys.columns AS c
JOIN sys.types AS ty ON c.user_type_id = ty.user_type_id
LEFT JOIN sys.identity_columns AS ic ON c.object_id = ic.object_id AND c.column_id = ic.column_id
LEFT JOIN sys.computed_columns AS cc ON c.object_id = cc.object_id AND c.column_id = cc.column_id
WHERE c.object_id = OBJECT_ID(@P1)
ORDER BY c.column_id ASC;
"#;

pub(crate) const TABLE_DEFAULTS_QUERY: &str = r#"
SELECT
    dc.name AS constraint_name,
    c.name AS column_name,
    dc.definition AS definition,
    CASE WHEN dc.is_system_named = 1 THEN '1' ELSE '0' END AS is_system_named
FROM sys.default_constraints AS dc
JOIN sys.columns AS c ON c.object_id = dc.parent_object_id AND c.column_id = dc.parent_column_id
WHERE dc.parent_object_id = OBJECT_ID(@P1)
ORDER BY c.column_id ASC;
"#;

pub(crate) const TABLE_DATA_SPACE_QUERY: &str = r#"
SELECT ds.name
FROM sys.indexes AS i
JOIN sys.data_spaces AS ds ON ds.data_space_id = i.data_space_id
WHERE i.object_id = OBJECT_ID(@P1)
  AND i.index_id IN (0, 1);
"#;

/// Modules referencing an object, with whether any reference is schema-bound.
pub(crate) const MODULE_DEPENDENTS_QUERY: &str = r#"
SELECT
    o.type AS object_type,
    SCHEMA_NAME(o.schema_id) AS object_schema,
    o.name AS object_name,
    m.definition AS definition,
    CASE WHEN d.schema_bound = 1 THEN '1' ELSE '0' END AS is_schema_bound
FROM (
    SELECT referencing_id, MAX(CAST(is_schema_bound_reference AS int)) AS schema_bound
    FROM sys.sql_expression_dependencies
    WHERE referenced_class = 1
      AND referenced_id = OBJECT_ID(@P1)
    GROUP BY referencing_id
) AS d
JOIN sys.objects AS o ON o.object_id = d.referencing_id
JOIN sys.sql_modules AS m ON m.object_id = o.object_id
WHERE o.type IN ('V', 'P', 'FN', 'IF', 'TF', 'TR')
  AND o.object_id <> OBJECT_ID(@P1)
ORDER BY o.object_id ASC;
"#;

/// Modules using a user-defined type, as a column or parameter type.
pub(crate) const TYPE_DEPENDENTS_QUERY: &str = r#"
SELECT
    o.type AS object_type,
    SCHEMA_NAME(o.schema_id) AS object_schema,
    o.name AS object_name,
    m.definition AS definition,
    '0' AS is_schema_bound
FROM sys.objects AS o
JOIN sys.sql_modules AS m ON m.object_id = o.object_id
WHERE o.object_id IN (
    SELECT referencing_id
    FROM sys.sql_expression_dependencies
    WHERE referenced_class = 6 AND referenced_id = TYPE_ID(@P1)
    UNION
    SELECT object_id
    FROM sys.parameters
    WHERE user_type_id = TYPE_ID(@P1)
)
ORDER BY o.object_id ASC;
"#;

pub(crate) const VIEW_TRIGGERS_QUERY: &str = r#"
SELECT
    o.type AS object_type,
    SCHEMA_NAME(o.schema_id) AS object_schema,
    o.name AS object_name,
    m.definition AS definition,
    '1' AS is_schema_bound
FROM sys.triggers AS tr
JOIN sys.objects AS o ON o.object_id = tr.object_id
JOIN sys.sql_modules AS m ON m.object_id = o.object_id
WHERE tr.parent_id = OBJECT_ID(@P1)
ORDER BY o.object_id ASC;
"#;

/// Check and default constraints whose expressions reference an object.
pub(crate) const CONSTRAINT_DEPENDENTS_QUERY: &str = r#"
SELECT
    o.type AS constraint_type,
    SCHEMA_NAME(t.schema_id) AS table_schema,
    t.name AS table_name,
    o.name AS constraint_name,
    COALESCE(ck.definition, df.definition) AS definition,
    c.name AS column_name
FROM sys.sql_expression_dependencies AS d
JOIN sys.objects AS o ON o.object_id = d.referencing_id
JOIN sys.tables AS t ON t.object_id = o.parent_object_id
LEFT JOIN sys.check_constraints AS ck ON ck.object_id = o.object_id
LEFT JOIN sys.default_constraints AS df ON df.object_id = o.object_id
LEFT JOIN sys.columns AS c ON c.object_id = df.parent_object_id AND c.column_id = df.parent_column_id
WHERE d.referenced_class = 1
  AND d.referenced_id = OBJECT_ID(@P1)
  AND o.type IN ('C', 'D')
ORDER BY o.object_id ASC;
"#;

pub(crate) const TABLE_CHECK_CONSTRAINTS_QUERY: &str = r#"
SELECT
    'C' AS constraint_type,
    SCHEMA_NAME(t.schema_id) AS table_schema,
    t.name AS table_name,
    ck.name AS constraint_name,
    ck.definition AS definition,
    c.name AS column_name
FROM sys.check_constraints AS ck
JOIN sys.tables AS t ON t.object_id = ck.parent_object_id
LEFT JOIN sys.columns AS c ON c.object_id = ck.parent_object_id AND c.column_id = ck.parent_column_id
WHERE ck.parent_object_id = OBJECT_ID(@P1)
ORDER BY ck.object_id ASC;
"#;

macro_rules! foreign_key_query {
    ($filter:literal) => {
        concat!(
            r#"
SELECT
    fk.name AS constraint_name,
    SCHEMA_NAME(pt.schema_id) AS table_schema,
    pt.name AS table_name,
    SCHEMA_NAME(rt.schema_id) AS referenced_schema,
    rt.name AS referenced_table,
    pc.name AS column_name,
    rc.name AS referenced_column,
    fk.delete_referential_action_desc AS on_delete,
    fk.update_referential_action_desc AS on_update,
    CASE WHEN fk.is_not_trusted = 1 THEN '1' ELSE '0' END AS is_not_trusted
FROM sys.foreign_keys AS fk
JOIN sys.foreign_key_columns AS fkc ON fkc.constraint_object_id = fk.object_id
JOIN sys.tables AS pt ON pt.object_id = fk.parent_object_id
JOIN sys.tables AS rt ON rt.object_id = fk.referenced_object_id
JOIN sys.columns AS pc ON pc.object_id = fkc.parent_object_id AND pc.column_id = fkc.parent_column_id
JOIN sys.columns AS rc ON rc.object_id = fkc.referenced_object_id AND rc.column_id = fkc.referenced_column_id
WHERE "#,
            $filter,
            r#"
ORDER BY fk.object_id ASC, fkc.constraint_column_id ASC;
"#
        )
    };
}

pub(crate) const REFERENCING_FOREIGN_KEYS_QUERY: &str =
    foreign_key_query!("fk.referenced_object_id = OBJECT_ID(@P1) AND fk.parent_object_id <> OBJECT_ID(@P1)");

/// Foreign keys backed by one key index: @P1 table, @P2 index name.
pub(crate) const KEY_FOREIGN_KEYS_QUERY: &str = foreign_key_query!(
    "fk.referenced_object_id = OBJECT_ID(@P1) AND fk.key_index_id = (SELECT i.index_id FROM sys.indexes AS i WHERE i.object_id = OBJECT_ID(@P1) AND i.name = @P2)"
);

pub(crate) const TABLE_FOREIGN_KEYS_QUERY: &str = foreign_key_query!(
    "(fk.parent_object_id = OBJECT_ID(@P1) OR fk.referenced_object_id = OBJECT_ID(@P1))"
);

pub(crate) const INDEXES_QUERY: &str = r#"
SELECT
    i.name AS index_name,
    CASE WHEN i.is_primary_key = 1 THEN '1' ELSE '0' END AS is_primary_key,
    CASE WHEN i.is_unique_constraint = 1 THEN '1' ELSE '0' END AS is_unique_constraint,
    CASE WHEN i.is_unique = 1 THEN '1' ELSE '0' END AS is_unique,
    i.type_desc AS type_desc,
    i.filter_definition AS filter_definition,
    c.name AS column_name,
    CASE WHEN ic.is_descending_key = 1 THEN '1' ELSE '0' END AS is_descending,
    CASE WHEN ic.is_included_column = 1 THEN '1' ELSE '0' END AS is_included
FROM sys.indexes AS i
JOIN sys.index_columns AS ic ON ic.object_id = i.object_id AND ic.index_id = i.index_id
JOIN sys.columns AS c ON c.object_id = ic.object_id AND c.column_id = ic.column_id
WHERE i.object_id = OBJECT_ID(@P1)
  AND i.index_id > 0
  AND i.is_hypothetical = 0
ORDER BY i.index_id ASC, ic.is_included_column ASC, ic.key_ordinal ASC, ic.index_column_id ASC;
"#;

/// Permissions on a securable: @P1 name, @P2 class (1 object, 6 type).
pub(crate) const PERMISSION_DEPENDENTS_QUERY: &str = r#"
SELECT
    p.state_desc AS state_desc,
    p.permission_name AS permission_name,
    pr.name AS principal_name
FROM sys.database_permissions AS p
JOIN sys.database_principals AS pr ON pr.principal_id = p.grantee_principal_id
WHERE p.minor_id = 0
  AND p.class = CAST(@P2 AS int)
  AND p.major_id = CASE CAST(@P2 AS int) WHEN 6 THEN TYPE_ID(@P1) ELSE OBJECT_ID(@P1) END
ORDER BY pr.name ASC, p.permission_name ASC;
"#;
