use std::cmp::Ordering;

use crate::{name::name_key, plan::PlannedObject};

/// Kind priority, then dependency depth, then declaration order.
fn create_order(left: &PlannedObject, right: &PlannedObject) -> Ordering {
    left.kind()
        .priority()
        .cmp(&right.kind().priority())
        .then(left.depth.cmp(&right.depth))
        .then(left.object.original_order().cmp(&right.object.original_order()))
        .then_with(|| name_key(left.name()).cmp(&name_key(right.name())))
}

pub fn sort_adds(objects: &mut [PlannedObject]) {
    objects.sort_by(create_order);
}

/// Exact reverse of [`sort_adds`].
pub fn sort_drops(objects: &mut [PlannedObject]) {
    objects.sort_by(|left, right| create_order(right, left));
}

#[cfg(test)]
mod tests {
    use super::{sort_adds, sort_drops};
    use crate::{
        SchemaObject, SchemaObjectKind as K,
        plan::{PlanReason, PlannedObject},
    };

    fn planned(kind: K, name: &str, order: usize, depth: usize) -> PlannedObject {
        PlannedObject::new(SchemaObject::new(kind, name, "", order), PlanReason::New).at_depth(depth)
    }

    fn names(objects: &[PlannedObject]) -> Vec<&str> {
        objects.iter().map(PlannedObject::name).collect()
    }

    #[test]
    fn adds_follow_kind_then_depth_then_order() {
        let mut objects = vec![
            planned(K::Permission, "grant", 0, 0),
            planned(K::View, "[dbo].[Outer]", 1, 1),
            planned(K::StoredProcedure, "[dbo].[Proc]", 2, 0),
            planned(K::View, "[dbo].[Inner]", 3, 0),
            planned(K::Table, "[dbo].[Beer]", 4, 0),
        ];
        sort_adds(&mut objects);
        assert_eq!(
            names(&objects),
            vec!["[dbo].[Beer]", "[dbo].[Inner]", "[dbo].[Outer]", "[dbo].[Proc]", "grant"]
        );
    }

    #[test]
    fn drops_are_the_reverse_of_adds() {
        let mut adds = vec![
            planned(K::Table, "[dbo].[A]", 0, 0),
            planned(K::Table, "[dbo].[B]", 1, 0),
            planned(K::View, "[dbo].[V]", 2, 0),
            planned(K::Index, "[dbo].[A].[IX]", 3, 0),
        ];
        let mut drops = adds.clone();
        sort_adds(&mut adds);
        sort_drops(&mut drops);
        adds.reverse();
        assert_eq!(names(&adds), names(&drops));
        assert_eq!(drops[0].name(), "[dbo].[V]");
    }
}
