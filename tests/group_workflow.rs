use rstest::{fixture, rstest};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use splitsmart::{
    schemas::{
        Currency, ExpenseCategory, ExpenseDraft, GroupCategory, GroupId, MemberId, NewGroup,
        Settlement, SettlementDraft, SettlementStatus, Split,
    },
    BookError, EngineConfig, InvalidSplitError, SplitBook,
};

const GOA: [&str; 3] = ["user-1", "user-2", "user-3"];

struct Fixture {
    book: SplitBook,
    goa: GroupId,
    flat: GroupId,
}

#[fixture]
fn seeded() -> Fixture {
    let mut book = SplitBook::default();
    let goa = book
        .add_group(
            NewGroup::new("Goa Trip 2024", GOA)
                .with_category(GroupCategory::Trip)
                .with_description("Beach vacation with friends"),
        )
        .unwrap();
    let flat = book
        .add_group(
            NewGroup::new("Flat Expenses", ["user-1", "user-4"]).with_category(GroupCategory::Home),
        )
        .unwrap();

    for (description, amount, payer, category) in [
        ("Hotel booking", dec!(8500), "user-1", ExpenseCategory::Travel),
        ("Dinner at beach shack", dec!(3200), "user-2", ExpenseCategory::FoodAndDining),
        ("Scuba diving", dec!(4050.50), "user-3", ExpenseCategory::Entertainment),
    ] {
        book.add_expense(
            &goa,
            ExpenseDraft::new(description, amount, payer, GOA).with_category(category),
        )
        .unwrap();
    }
    for (description, amount, payer) in [
        ("Electricity bill", dec!(2450), "user-1"),
        ("Groceries", dec!(1850), "user-4"),
        ("Internet", dec!(1200), "user-1"),
    ] {
        book.add_expense(
            &flat,
            ExpenseDraft::new(description, amount, payer, ["user-1", "user-4"])
                .with_category(ExpenseCategory::BillsAndUtilities),
        )
        .unwrap();
    }

    Fixture { book, goa, flat }
}

fn net(book: &SplitBook, group: &GroupId, member: &str) -> Decimal {
    book.balances(group).unwrap()[&MemberId::from(member)]
}

#[rstest]
#[case("user-1", dec!(3249.82))]
#[case("user-2", dec!(-2050.17))]
#[case("user-3", dec!(-1199.65))]
fn trip_balances(seeded: Fixture, #[case] member: &str, #[case] expected: Decimal) {
    assert_eq!(net(&seeded.book, &seeded.goa, member), expected);
}

#[rstest]
fn groups_do_not_leak_into_each_other(seeded: Fixture) {
    let Fixture { book, flat, .. } = seeded;
    let balances = book.balances(&flat).unwrap();
    assert_eq!(balances.len(), 2);
    assert_eq!(balances[&MemberId::from("user-1")], dec!(900));
    assert_eq!(balances[&MemberId::from("user-4")], dec!(-900));
    assert_eq!(
        book.suggested_settlements(&flat).unwrap(),
        vec![Settlement::new("user-4", "user-1", dec!(900))]
    );
}

#[rstest]
fn paying_down_the_trip(seeded: Fixture) {
    let Fixture { mut book, goa, .. } = seeded;
    assert_eq!(
        book.suggested_settlements(&goa).unwrap(),
        vec![
            Settlement::new("user-2", "user-1", dec!(2050.17)),
            Settlement::new("user-3", "user-1", dec!(1199.65)),
        ]
    );

    let full = book
        .record_settlement(&goa, SettlementDraft::new("user-2", "user-1", dec!(2050.17)))
        .unwrap();
    let partial = book
        .record_settlement(
            &goa,
            SettlementDraft::new("user-3", "user-1", dec!(1000)).with_payment_method("UPI"),
        )
        .unwrap();
    book.complete_settlement(&full).unwrap();
    book.complete_settlement(&partial).unwrap();

    assert_eq!(
        book.suggested_settlements(&goa).unwrap(),
        vec![Settlement::new("user-3", "user-1", dec!(199.65))]
    );
    let records: Vec<_> = book.settlement_records(&goa).collect();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|record| record.status == SettlementStatus::Completed));
    assert_eq!(records[0].currency, "INR");

    // The expense view is unaffected by payments.
    assert_eq!(net(&book, &goa, "user-2"), dec!(-2050.17));
}

#[rstest]
fn percentage_expense_in_the_flat(seeded: Fixture) {
    let Fixture { mut book, flat, .. } = seeded;
    let split = Split::Percentage(
        [("user-1", dec!(33.33)), ("user-4", dec!(66.67))]
            .into_iter()
            .map(|(id, pct)| (MemberId::from(id), pct))
            .collect(),
    );
    let id = book
        .add_expense(
            &flat,
            ExpenseDraft::new("Furniture", dec!(999.99), "user-4", ["user-1", "user-4"])
                .with_split(split),
        )
        .unwrap();

    let expense = book.expense(&id).unwrap();
    let total: Decimal = expense.shares.values().copied().sum();
    assert_eq!(total, dec!(999.99));
    assert_eq!(expense.share_of(&MemberId::from("user-1")), dec!(333.30));
    assert_eq!(expense.share_of(&MemberId::from("user-4")), dec!(666.69));
}

#[rstest]
fn bad_percentages_are_refused(seeded: Fixture) {
    let Fixture { mut book, flat, .. } = seeded;
    let split = Split::Percentage(
        [("user-1", dec!(50)), ("user-4", dec!(40))]
            .into_iter()
            .map(|(id, pct)| (MemberId::from(id), pct))
            .collect(),
    );
    let err = book
        .add_expense(
            &flat,
            ExpenseDraft::new("Sofa", dec!(100), "user-1", ["user-1", "user-4"]).with_split(split),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        BookError::InvalidSplit(InvalidSplitError::PercentageSumMismatch(total))
            if total == dec!(90)
    ));
}

#[test]
fn zero_decimal_currency_group() {
    let mut book = SplitBook::default();
    let group = book
        .add_group(NewGroup::new("Tokyo", ["A", "B", "C"]).with_currency(Currency::new("jpy", 0)))
        .unwrap();
    assert_eq!(book.group(&group).unwrap().currency.code, "JPY");

    let id = book
        .add_expense(&group, ExpenseDraft::new("Ramen", dec!(1000), "B", ["A", "B", "C"]))
        .unwrap();
    let shares = &book.expense(&id).unwrap().shares;
    assert_eq!(shares[&MemberId::from("A")], dec!(334));
    assert_eq!(shares[&MemberId::from("C")], dec!(333));

    let err = book
        .add_expense(&group, ExpenseDraft::new("Tea", dec!(10.5), "A", ["A", "B"]))
        .unwrap_err();
    assert!(matches!(err, BookError::InvalidSplit(InvalidSplitError::SubMinorUnit(_))));
}

#[test]
fn configured_tolerance_absorbs_small_balances() {
    let config = EngineConfig::from_json_str(r#"{ "settlement_tolerance": "1" }"#).unwrap();
    let mut book = SplitBook::new(config);
    let group = book.add_group(NewGroup::new("Cafe", ["A", "B"])).unwrap();
    book.add_expense(&group, ExpenseDraft::new("Coffee", dec!(1.80), "A", ["A", "B"]))
        .unwrap();

    assert_eq!(net(&book, &group, "B"), dec!(-0.90));
    assert!(book.suggested_settlements(&group).unwrap().is_empty());
}

#[rstest]
fn snapshot_round_trip(seeded: Fixture) {
    let Fixture { mut book, goa, flat } = seeded;
    let payment = book
        .record_settlement(&flat, SettlementDraft::new("user-4", "user-1", dec!(900)))
        .unwrap();

    let raw = book.to_json().unwrap();
    assert!(raw.contains(r#""strategy": "equal""#));
    assert!(raw.contains(r#""amount": "4050.50""#));

    let mut restored = SplitBook::from_json(&raw).unwrap();
    assert_eq!(restored.balances(&goa).unwrap(), book.balances(&goa).unwrap());
    assert_eq!(restored.groups().count(), 2);

    restored.complete_settlement(&payment).unwrap();
    assert!(restored.suggested_settlements(&flat).unwrap().is_empty());
    assert!(matches!(
        SplitBook::from_json("not json"),
        Err(BookError::Snapshot(_))
    ));
}
