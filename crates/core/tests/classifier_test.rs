use dbshape_core::{Classifier, ParseError, SchemaObjectKind as K};

const SOURCE: &str = "\
-- PRESCRIPT SeedLookup
INSERT INTO [dbo].[Lookup] VALUES (1)
GO
SET ANSI_NULLS ON
SET QUOTED_IDENTIFIER ON
GO
CREATE SCHEMA [sales]
GO
CREATE TABLE sales.Beer ([ID] int NOT NULL, [Name] varchar(64), CONSTRAINT PK_Beer PRIMARY KEY ([ID]))
GO
CREATE NONCLUSTERED INDEX IX_Beer_Name ON sales.Beer ([Name])
GO
ALTER TABLE sales.Beer ADD CONSTRAINT DF_Beer_Name DEFAULT ('') FOR [Name]
GO
-- the literal below must not be mistaken for a table
CREATE PROC sales.GetBeer AS SELECT 'CREATE TABLE Decoy (ID int)' AS Text
GO
grant execute on sales.GetBeer to app
GO
";

#[test]
fn every_chunk_is_classified_in_source_order() {
    let objects = Classifier::standard()
        .parse_objects(SOURCE)
        .expect("source should classify");

    let classified = objects
        .iter()
        .map(|object| (object.kind(), object.name(), object.original_order()))
        .collect::<Vec<_>>();
    assert_eq!(
        classified,
        vec![
            (K::PreScript, "[SeedLookup]", 0),
            (K::Unused, "", 1),
            (K::Schema, "[sales]", 2),
            (K::Table, "[sales].[Beer]", 3),
            (K::Index, "[sales].[Beer].[IX_Beer_Name]", 4),
            (K::Default, "[sales].[Beer].[DF_Beer_Name]", 5),
            (K::StoredProcedure, "[sales].[GetBeer]", 6),
            (K::Permission, "GRANT EXECUTE ON [sales].[GetBeer] TO [app]", 7),
        ]
    );
}

#[test]
fn identical_text_signs_identically_across_line_endings() {
    let classifier = Classifier::standard();
    let unix = classifier
        .parse_object("CREATE VIEW v AS SELECT 1 AS One\n", 0)
        .expect("view");
    let windows = classifier
        .parse_object("CREATE VIEW v AS SELECT 1 AS One\r\n", 3)
        .expect("view");

    assert_eq!(unix.name(), "[dbo].[v]");
    assert!(unix.signature().matches(windows.signature()));
}

#[test]
fn anonymous_constraints_are_rejected() {
    let error = Classifier::standard()
        .parse_object("CREATE TABLE Beer ([ID] int PRIMARY KEY)", 0)
        .expect_err("unnamed primary key");

    assert!(matches!(
        error,
        ParseError::AnonymousConstraint { construct: "PRIMARY KEY", ref object, .. } if object == "[dbo].[Beer]"
    ));
}

#[test]
fn constraint_keywords_inside_identifiers_are_names() {
    let classification = Classifier::standard()
        .classify(
            "CREATE TABLE Doc ([ID] int NOT NULL CONSTRAINT [PK_Doc] PRIMARY KEY, \
             [References] int NULL, \"Primary Key\" int NULL, [Check(Out)] bit NULL)",
        )
        .expect("bracketed keywords are plain column names");

    assert_eq!(classification.kind, K::Table);
    assert_eq!(classification.name, "[dbo].[Doc]");
}

#[test]
fn unrecognized_statements_are_errors() {
    let error = Classifier::standard()
        .parse_objects("CREATE TABLE Beer ([ID] int)\nGO\nSELECT 1\n")
        .expect_err("bare select");

    assert!(matches!(error, ParseError::Unrecognized { ref sql } if sql == "SELECT 1"));
}
