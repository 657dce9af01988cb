diesel::table! {
    users (id) {
        id -> Uuid,
        full_name -> Text,
        email -> Text,
        role -> Text,
        is_active -> Bool,
        service_regions -> Array<Text>,
        active_opportunities -> Int4,
        last_assigned_at -> Nullable<Timestamptz>,
        api_token -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    leads (id) {
        id -> Uuid,
        first_name -> Text,
        last_name -> Text,
        email -> Nullable<Text>,
        phone -> Nullable<Text>,
        postcode -> Text,
        project_type -> Nullable<Text>,
        source -> Nullable<Text>,
        notes -> Nullable<Text>,
        opted_out -> Bool,
        owner_id -> Nullable<Uuid>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    opportunities (id) {
        id -> Uuid,
        lead_id -> Uuid,
        stage -> Text,
        owner_id -> Nullable<Uuid>,
        value_estimate -> Nullable<Int8>,
        deposit_paid_at -> Nullable<Timestamptz>,
        completed_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    stage_log (id) {
        id -> Uuid,
        opportunity_id -> Uuid,
        from_stage -> Nullable<Text>,
        to_stage -> Text,
        actor_id -> Nullable<Uuid>,
        rationale -> Text,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    tasks (id) {
        id -> Uuid,
        opportunity_id -> Uuid,
        task_type -> Text,
        title -> Text,
        status -> Text,
        due_at -> Nullable<Timestamptz>,
        owner_id -> Nullable<Uuid>,
        created_at -> Timestamptz,
        completed_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    bookings (id) {
        id -> Uuid,
        opportunity_id -> Uuid,
        booking_type -> Text,
        scheduled_at -> Timestamptz,
        duration_minutes -> Int4,
        outcome -> Text,
        tracking_status -> Text,
        calendar_event_id -> Nullable<Text>,
        notes -> Nullable<Text>,
        ai_suggestion -> Jsonb,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    post_call_actions (id) {
        id -> Uuid,
        booking_id -> Uuid,
        opportunity_id -> Uuid,
        action_type -> Text,
        suggested_stage -> Nullable<Text>,
        actual_stage -> Nullable<Text>,
        confidence -> Nullable<Float8>,
        rationale -> Text,
        actor_id -> Nullable<Uuid>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    message_templates (id) {
        id -> Uuid,
        name -> Text,
        trigger_kind -> Text,
        trigger_value -> Text,
        channels -> Array<Text>,
        delay_minutes -> Int4,
        subject -> Nullable<Text>,
        body -> Text,
        is_active -> Bool,
        sort_order -> Int4,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    message_log (id) {
        id -> Uuid,
        lead_id -> Uuid,
        opportunity_id -> Nullable<Uuid>,
        template_id -> Nullable<Uuid>,
        channel -> Text,
        status -> Text,
        scheduled_for -> Nullable<Timestamptz>,
        subject -> Nullable<Text>,
        body -> Text,
        external_id -> Nullable<Text>,
        error_detail -> Nullable<Text>,
        created_at -> Timestamptz,
        sent_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    invoices (id) {
        id -> Uuid,
        opportunity_id -> Uuid,
        amount -> Int8,
        deposit_amount -> Int8,
        status -> Text,
        checkout_session_id -> Nullable<Text>,
        created_at -> Timestamptz,
        paid_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    payments (id) {
        id -> Uuid,
        invoice_id -> Uuid,
        amount -> Int8,
        external_id -> Text,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(opportunities -> leads (lead_id));
diesel::joinable!(stage_log -> opportunities (opportunity_id));
diesel::joinable!(tasks -> opportunities (opportunity_id));
diesel::joinable!(bookings -> opportunities (opportunity_id));
diesel::joinable!(post_call_actions -> bookings (booking_id));
diesel::joinable!(message_log -> leads (lead_id));
diesel::joinable!(invoices -> opportunities (opportunity_id));
diesel::joinable!(payments -> invoices (invoice_id));

diesel::allow_tables_to_appear_in_same_query!(
    users,
    leads,
    opportunities,
    stage_log,
    tasks,
    bookings,
    post_call_actions,
    message_templates,
    message_log,
    invoices,
    payments,
);
